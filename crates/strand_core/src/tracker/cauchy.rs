//! Cauchy endgame: recover x(0) as the mean of x along closed loops
//! around t = 0.
//!
//! The core tracker is driven around the circle |t| = t_e through the n-th
//! roots of unity, one chord at a time. When the loop closes after m
//! revolutions, the accumulated sample mean is the Cauchy-integral estimate
//! of x(0) and m is the winding number of the branch. The affine patch is
//! held fixed for the whole excursion and restored on every exit path.

use nalgebra::DVector;
use num_complex::Complex;
use tracing::debug;

use super::{CoreStatus, CoreTracker};
use crate::linalg;
use crate::traits::Homotopy;

/// Outcome of one endgame invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CauchyResult {
    /// The loop closed after `winding` revolutions; the prediction buffer
    /// holds the estimate of x(0).
    Success { winding: usize },
    /// No closure within the winding budget; the path point is back on the
    /// circle at angle zero and tracking can continue.
    MaxWindingExceeded,
    /// A sub-track failed with the given core status.
    CoreFailure(CoreStatus),
}

/// Scratch state of the endgame, reused across invocations.
#[derive(Debug, Clone)]
pub struct CauchyEndgame {
    unit_roots: Vec<Complex<f64>>,
    base_point: DVector<Complex<f64>>,
    prediction: DVector<Complex<f64>>,
}

impl CauchyEndgame {
    pub fn new(dim: usize) -> Self {
        Self {
            unit_roots: Vec::new(),
            base_point: DVector::zeros(dim),
            prediction: DVector::zeros(dim),
        }
    }

    /// The x(0) estimate of the most recent successful invocation.
    pub fn prediction(&self) -> &DVector<Complex<f64>> {
        &self.prediction
    }

    fn ensure_unit_roots(&mut self, n: usize) {
        if self.unit_roots.len() != n {
            self.unit_roots = (0..n)
                .map(|j| Complex::from_polar(1.0, std::f64::consts::TAU * j as f64 / n as f64))
                .collect();
        }
    }

    /// Runs loops around t = 0 at the core tracker's current radius.
    ///
    /// The patch-update flag is forced off for the duration and restored on
    /// every exit path, and the accepted/rejected counters of the outer
    /// track are carried across the sub-tracks.
    pub fn run<H: Homotopy>(
        &mut self,
        core: &mut CoreTracker<H>,
        samples_per_loop: usize,
        max_winding_number: usize,
    ) -> CauchyResult {
        self.ensure_unit_roots(samples_per_loop);
        let accepted_before = core.state.accepted_steps;
        let rejected_before = core.state.rejected_steps;
        let patch_before = core.options.update_patch;
        core.options.update_patch = false;

        let result = self.loop_and_average(core, samples_per_loop, max_winding_number);

        core.options.update_patch = patch_before;
        core.state.accepted_steps += accepted_before;
        core.state.rejected_steps += rejected_before;
        result
    }

    fn loop_and_average<H: Homotopy>(
        &mut self,
        core: &mut CoreTracker<H>,
        samples_per_loop: usize,
        max_winding_number: usize,
    ) -> CauchyResult {
        let t_e = core.state.t;
        self.base_point.copy_from(&core.state.x);
        self.prediction.fill(Complex::new(0.0, 0.0));
        let closure_tol = 4.0 * core.options.accuracy;

        let mut accepted = 0usize;
        let mut rejected = 0usize;
        let mut x_from = self.base_point.clone();

        for winding in 1..=max_winding_number {
            for j in 1..=samples_per_loop {
                let from = t_e * self.unit_roots[(j - 1) % samples_per_loop];
                let to = t_e * self.unit_roots[j % samples_per_loop];
                let status = core.track(&x_from, from, to);
                accepted += core.state.accepted_steps;
                rejected += core.state.rejected_steps;
                if status != CoreStatus::Success {
                    debug!(?status, winding, sample = j, "endgame sub-track failed");
                    core.state.accepted_steps = accepted;
                    core.state.rejected_steps = rejected;
                    return CauchyResult::CoreFailure(status);
                }
                self.prediction += &core.state.x;
                x_from.copy_from(&core.state.x);
            }

            let gap = linalg::distance(&core.state.x, &self.base_point);
            if gap < closure_tol {
                let samples = (winding * samples_per_loop) as f64;
                let scale = Complex::new(1.0 / samples, 0.0);
                for v in self.prediction.iter_mut() {
                    *v *= scale;
                }
                debug!(winding, gap, "endgame loop closed");
                core.state.accepted_steps = accepted;
                core.state.rejected_steps = rejected;
                return CauchyResult::Success { winding };
            }
        }

        debug!(max_winding_number, "endgame exceeded winding budget");
        core.state.accepted_steps = accepted;
        core.state.rejected_steps = rejected;
        CauchyResult::MaxWindingExceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homotopy::StraightLineHomotopy;
    use crate::poly::{Polynomial, PolynomialSystem};
    use crate::tracker::CoreTrackerOptions;

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    // H = t·(x² − 1) + (1 − t)·x² = x² − t: the path x(t) = ±√t has a
    // 2-cycle branch point at t = 0 with x(0) = 0.
    fn square_root_tracker() -> CoreTracker<StraightLineHomotopy> {
        let mut g = Polynomial::zero(1);
        g.add_term(c(1.0, 0.0), &[2]).add_term(c(-1.0, 0.0), &[0]);
        let mut f = Polynomial::zero(1);
        f.add_term(c(1.0, 0.0), &[2]);
        let h = StraightLineHomotopy::new(
            PolynomialSystem::new(vec![g]).unwrap(),
            PolynomialSystem::new(vec![f]).unwrap(),
            c(1.0, 0.0),
        )
        .unwrap();
        CoreTracker::new(h, CoreTrackerOptions::default())
    }

    #[test]
    fn test_endgame_winding_two_on_square_root_branch() {
        let mut core = square_root_tracker();
        // Put the tracker on the branch x = √t at t_e = 0.01.
        let t_e = c(0.01, 0.0);
        let x = DVector::from_vec(vec![c(0.1, 0.0)]);
        core.setup(&x, t_e, c(0.0, 0.0));
        assert_eq!(core.state.status, CoreStatus::Tracking);

        let mut endgame = CauchyEndgame::new(1);
        let result = endgame.run(&mut core, 5, 12);
        assert_eq!(result, CauchyResult::Success { winding: 2 });
        assert!(
            endgame.prediction()[0].norm() < 1e-3,
            "x(0) estimate = {}",
            endgame.prediction()[0]
        );
        // Patch flag restored.
        assert!(core.options.update_patch);
    }

    #[test]
    fn test_endgame_winding_one_on_smooth_path() {
        // H = x² − 2 + t (regular at t = 0): the loop closes after one
        // revolution.
        let mut g = Polynomial::zero(1);
        g.add_term(c(1.0, 0.0), &[2]).add_term(c(-1.0, 0.0), &[0]);
        let mut f = Polynomial::zero(1);
        f.add_term(c(1.0, 0.0), &[2]).add_term(c(-2.0, 0.0), &[0]);
        let h = StraightLineHomotopy::new(
            PolynomialSystem::new(vec![g]).unwrap(),
            PolynomialSystem::new(vec![f]).unwrap(),
            c(1.0, 0.0),
        )
        .unwrap();
        let mut core = CoreTracker::new(h, CoreTrackerOptions::default());

        let t_e = c(0.05, 0.0);
        let x = DVector::from_vec(vec![c((2.0f64 - 0.05).sqrt(), 0.0)]);
        core.setup(&x, t_e, c(0.0, 0.0));

        let mut endgame = CauchyEndgame::new(1);
        let result = endgame.run(&mut core, 5, 12);
        assert_eq!(result, CauchyResult::Success { winding: 1 });
        assert!(
            (endgame.prediction()[0] - c(2.0f64.sqrt(), 0.0)).norm() < 1e-2,
            "x(0) estimate = {}",
            endgame.prediction()[0]
        );
    }

    #[test]
    fn test_endgame_counters_accumulate_into_outer_state() {
        let mut core = square_root_tracker();
        let t_e = c(0.01, 0.0);
        let x = DVector::from_vec(vec![c(0.1, 0.0)]);
        core.setup(&x, t_e, c(0.0, 0.0));
        // Simulate an outer track that already took steps.
        core.state.accepted_steps = 17;
        core.state.rejected_steps = 3;

        let mut endgame = CauchyEndgame::new(1);
        let result = endgame.run(&mut core, 5, 12);
        assert!(matches!(result, CauchyResult::Success { .. }));
        assert!(core.state.accepted_steps > 17);
        assert!(core.state.rejected_steps >= 3);
    }
}
