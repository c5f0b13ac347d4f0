//! Per-path results returned to the driver.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::CoreStatus;
use crate::linalg;

/// Condition estimates above this classify an endpoint as singular.
pub const SINGULAR_COND_TOL: f64 = 1e14;

/// Terminal classification of a tracked path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PathStatus {
    Tracking,
    Success,
    AtInfinity,
    TerminatedInvalidStartValue,
    TerminatedMaxIters,
    TerminatedStepSizeTooSmall,
    TerminatedSingularity,
    TerminatedIllConditioned,
    TrackerFailed,
}

/// Total mapping from core statuses into the richer path statuses.
pub fn map_core_status(status: CoreStatus) -> PathStatus {
    match status {
        CoreStatus::Tracking => PathStatus::Tracking,
        CoreStatus::Success => PathStatus::Success,
        CoreStatus::TerminatedInvalidStartValue => PathStatus::TerminatedInvalidStartValue,
        CoreStatus::TerminatedMaxIters => PathStatus::TerminatedMaxIters,
        CoreStatus::TerminatedStepSizeTooSmall => PathStatus::TerminatedStepSizeTooSmall,
        CoreStatus::TerminatedSingularity => PathStatus::TerminatedSingularity,
        CoreStatus::TerminatedIllConditioned => PathStatus::TerminatedIllConditioned,
    }
}

/// Everything the driver learns about one tracked path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    pub return_code: PathStatus,
    /// Endpoint in user coordinates (pull-back of the tracked vector).
    pub solution: Vec<Complex<f64>>,
    /// t at which the result was decided.
    pub t: f64,
    /// Final Newton update norm; populated only for non-singular successes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// ‖H(x, 0)‖₂ at the reported solution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub residual: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_jacobian: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winding_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endgame_zone_start: Option<f64>,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valuation: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valuation_accuracy: Option<Vec<f64>>,
}

impl PathResult {
    pub fn is_success(&self) -> bool {
        self.return_code == PathStatus::Success
    }

    pub fn is_at_infinity(&self) -> bool {
        self.return_code == PathStatus::AtInfinity
    }

    /// Neither a finite solution nor a properly classified divergence.
    pub fn is_failed(&self) -> bool {
        !self.is_success() && !self.is_at_infinity()
    }

    /// Singular endpoint: winding number above one, or a Jacobian condition
    /// estimate beyond [`SINGULAR_COND_TOL`].
    pub fn is_singular(&self) -> bool {
        self.winding_number.map_or(false, |m| m > 1)
            || self
                .condition_jacobian
                .map_or(false, |cond| cond > SINGULAR_COND_TOL)
    }

    pub fn is_nonsingular(&self) -> bool {
        self.is_success() && !self.is_singular()
    }

    /// Real solution up to `tol` in the 2-norm of the imaginary parts.
    pub fn is_real(&self, tol: f64) -> bool {
        linalg::imag_norm(&self.solution) < tol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_result() -> PathResult {
        PathResult {
            return_code: PathStatus::Success,
            solution: vec![Complex::new(1.0, 0.0), Complex::new(2.0, 1e-9)],
            t: 0.0,
            accuracy: Some(1e-10),
            residual: Some(1e-12),
            condition_jacobian: Some(10.0),
            winding_number: None,
            endgame_zone_start: None,
            accepted_steps: 12,
            rejected_steps: 1,
            valuation: None,
            valuation_accuracy: None,
        }
    }

    #[test]
    fn test_classification_of_regular_success() {
        let r = base_result();
        assert!(r.is_success());
        assert!(!r.is_at_infinity());
        assert!(!r.is_failed());
        assert!(!r.is_singular());
        assert!(r.is_nonsingular());
        assert!(r.is_real(1e-6));
        assert!(!r.is_real(1e-12));
    }

    #[test]
    fn test_winding_number_makes_singular() {
        let mut r = base_result();
        r.winding_number = Some(2);
        assert!(r.is_singular());
        assert!(!r.is_nonsingular());
        r.winding_number = Some(1);
        assert!(!r.is_singular());
    }

    #[test]
    fn test_condition_makes_singular() {
        let mut r = base_result();
        r.condition_jacobian = Some(1e15);
        assert!(r.is_singular());
    }

    #[test]
    fn test_at_infinity_is_not_failed() {
        let mut r = base_result();
        r.return_code = PathStatus::AtInfinity;
        assert!(r.is_at_infinity());
        assert!(!r.is_failed());
        r.return_code = PathStatus::TrackerFailed;
        assert!(r.is_failed());
    }

    #[test]
    fn test_core_status_mapping_is_total() {
        let all = [
            CoreStatus::Tracking,
            CoreStatus::Success,
            CoreStatus::TerminatedInvalidStartValue,
            CoreStatus::TerminatedMaxIters,
            CoreStatus::TerminatedStepSizeTooSmall,
            CoreStatus::TerminatedSingularity,
            CoreStatus::TerminatedIllConditioned,
        ];
        for status in all {
            let mapped = map_core_status(status);
            if status == CoreStatus::Success {
                assert_eq!(mapped, PathStatus::Success);
            }
            if status == CoreStatus::Tracking {
                assert_eq!(mapped, PathStatus::Tracking);
            }
        }
    }
}
