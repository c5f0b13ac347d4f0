//! Path tracking from t = 1 to t = 0 with endgame and endpoint
//! classification.
//!
//! `PathTracker` owns a `CoreTracker` by strict composition and drives it
//! step by step: after every accepted step it refreshes the valuation
//! estimates and decides whether the path is diverging. Once inside the
//! endgame zone with trustworthy valuations it hands control to the Cauchy
//! endgame to recover singular endpoints.

use anyhow::{bail, Result};
use nalgebra::DVector;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cauchy::{CauchyEndgame, CauchyResult};
use super::result::{map_core_status, PathResult, PathStatus, SINGULAR_COND_TOL};
use super::valuation::ValuationEstimator;
use super::{CoreOptionOverrides, CoreStatus, CoreTracker, CoreTrackerOptions};
use crate::linalg::LinAlgThreadGuard;
use crate::traits::Homotopy;
use crate::vector::VectorLayout;

/// Accurate valuations below this bound classify the path as diverging.
const VAL_AT_INFINITY_BOUND: f64 = -0.05;
/// Distance from the nearest integer at which a valuation counts as
/// fractional.
const FRACTIONAL_VAL_TOL: f64 = 0.1;
/// Core-tracker distress thresholds that trigger the endgame even for
/// integer valuations.
const DISTRESS_DIGITS_LOST: f64 = 4.0;
const DISTRESS_OMEGA: f64 = 100.0;
const DISTRESS_STEP_SIZE: f64 = 1e-6;

fn default_at_infinity_check() -> bool {
    true
}

fn default_max_step_size_endgame_start() -> f64 {
    1e-6
}

fn default_min_val_accuracy() -> f64 {
    1e-3
}

fn default_samples_per_loop() -> usize {
    5
}

fn default_max_winding_number() -> usize {
    12
}

fn default_max_affine_norm() -> f64 {
    1e6
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PathTrackerOptions {
    #[serde(default = "default_at_infinity_check")]
    pub at_infinity_check: bool,
    /// Step sizes at or above this keep the tracker out of the endgame zone.
    #[serde(default = "default_max_step_size_endgame_start")]
    pub max_step_size_endgame_start: f64,
    #[serde(default = "default_min_val_accuracy")]
    pub min_val_accuracy: f64,
    #[serde(default = "default_samples_per_loop")]
    pub samples_per_loop: usize,
    #[serde(default = "default_max_winding_number")]
    pub max_winding_number: usize,
    /// Affine-chart norms above this flip a projective success to
    /// at-infinity; a no-op for affine layouts.
    #[serde(default = "default_max_affine_norm")]
    pub max_affine_norm: f64,
}

impl Default for PathTrackerOptions {
    fn default() -> Self {
        Self {
            at_infinity_check: default_at_infinity_check(),
            max_step_size_endgame_start: default_max_step_size_endgame_start(),
            min_val_accuracy: default_min_val_accuracy(),
            samples_per_loop: default_samples_per_loop(),
            max_winding_number: default_max_winding_number(),
            max_affine_norm: default_max_affine_norm(),
        }
    }
}

/// Mutable per-path state of the path tracker.
#[derive(Debug, Clone)]
pub struct PathTrackerState {
    pub status: PathStatus,
    pub t: f64,
    pub endgame_zone_start: Option<f64>,
    /// 0 until the Cauchy endgame closes a loop.
    pub winding_number: usize,
    /// Number of Cauchy endgame invocations during this track.
    pub endgame_attempts: usize,
    /// Decided endpoint in tracked (extended) coordinates.
    pub solution: DVector<Complex<f64>>,
    /// True when the solution came out of the endgame prediction buffer.
    pub endgame_solution: bool,
}

impl PathTrackerState {
    fn new(dim: usize) -> Self {
        Self {
            status: PathStatus::Tracking,
            t: 1.0,
            endgame_zone_start: None,
            winding_number: 0,
            endgame_attempts: 0,
            solution: DVector::zeros(dim),
            endgame_solution: false,
        }
    }
}

/// The per-path engine: core tracking, valuations, endgame, classification.
#[derive(Debug, Clone)]
pub struct PathTracker<H: Homotopy> {
    core: CoreTracker<H>,
    layout: VectorLayout,
    pub options: PathTrackerOptions,
    pub state: PathTrackerState,
    valuation: ValuationEstimator,
    endgame: CauchyEndgame,
}

impl<H: Homotopy> PathTracker<H> {
    pub fn new(
        homotopy: H,
        layout: VectorLayout,
        core_options: CoreTrackerOptions,
        options: PathTrackerOptions,
    ) -> Result<Self> {
        if homotopy.dimension() != layout.len() {
            bail!(
                "Homotopy dimension {} does not match vector layout length {}.",
                homotopy.dimension(),
                layout.len()
            );
        }
        if options.samples_per_loop < 3 {
            bail!("samples_per_loop must be at least 3.");
        }
        let dim = layout.len();
        Ok(Self {
            core: CoreTracker::new(homotopy, core_options),
            valuation: ValuationEstimator::new(&layout),
            endgame: CauchyEndgame::new(dim),
            state: PathTrackerState::new(dim),
            layout,
            options,
        })
    }

    pub fn layout(&self) -> &VectorLayout {
        &self.layout
    }

    pub fn core(&self) -> &CoreTracker<H> {
        &self.core
    }

    pub fn valuation(&self) -> &ValuationEstimator {
        &self.valuation
    }

    /// Tracks a user-coordinate start solution from t = 1 to t = 0.
    pub fn track(&mut self, start: &[Complex<f64>]) -> PathResult {
        self.track_with_options(start, CoreOptionOverrides::default())
    }

    /// Re-entrant track with per-call core-option overrides; the previous
    /// options are restored before returning.
    pub fn track_with_options(
        &mut self,
        start: &[Complex<f64>],
        overrides: CoreOptionOverrides,
    ) -> PathResult {
        self.track_from(start, 1.0, overrides)
    }

    /// Tracks from an arbitrary start time t₁ down to 0.
    pub fn track_from(
        &mut self,
        start: &[Complex<f64>],
        t_start: f64,
        overrides: CoreOptionOverrides,
    ) -> PathResult {
        let saved = self.core.options;
        if let Some(accuracy) = overrides.accuracy {
            self.core.options.accuracy = accuracy;
        }
        if let Some(iters) = overrides.max_corrector_iters {
            self.core.options.max_corrector_iters = iters;
        }
        if let Some(steps) = overrides.max_steps {
            self.core.options.max_steps = steps;
        }
        let result = self.track_inner(start, t_start);
        self.core.options = saved;
        result
    }

    fn track_inner(&mut self, start: &[Complex<f64>], t_start: f64) -> PathResult {
        // Inner linear algebra runs single threaded while paths are tracked
        // from outer parallelism; restored on drop.
        let _la_guard = LinAlgThreadGuard::pin_single();

        self.valuation.reset();
        self.state = PathTrackerState::new(self.layout.len());
        self.state.t = t_start;

        let x0 = self.layout.embed(start);
        self.core
            .setup(&x0, Complex::new(t_start, 0.0), Complex::new(0.0, 0.0));
        self.state.solution.copy_from(&self.core.state.x);

        loop {
            match self.core.state.status {
                CoreStatus::Tracking => {}
                status => {
                    self.state.status = map_core_status(status);
                    break;
                }
            }
            if self.core.state.total_steps() >= self.core.options.max_steps {
                self.state.status = PathStatus::TerminatedMaxIters;
                break;
            }

            self.core.step();
            if self.core.state.last_step_failed {
                continue;
            }

            let t_now = self.core.state.t.norm();
            let delta_t = (self.core.state.t_prev - self.core.state.t).norm();
            // The valuation formula degenerates at t = 0 itself; the final
            // step into the target never feeds the estimator.
            if t_now > 0.0 {
                self.valuation.update(
                    &self.layout,
                    &self.core.state.x,
                    &self.core.state.x_dot,
                    t_now,
                    delta_t,
                );
            }
            self.state.t = t_now;

            if self.core.state.status == CoreStatus::Success {
                continue;
            }
            if self.core.state.step_size >= self.options.max_step_size_endgame_start {
                continue;
            }
            if self.options.at_infinity_check
                && self
                    .valuation
                    .any_accurate_below(VAL_AT_INFINITY_BOUND, self.options.min_val_accuracy)
            {
                self.state.status = PathStatus::AtInfinity;
                break;
            }
            if !self.valuation.all_accurate(self.options.min_val_accuracy) {
                continue;
            }
            if self.state.endgame_zone_start.is_none() {
                self.state.endgame_zone_start = Some(t_now);
                debug!(t = t_now, "entering endgame zone");
            }
            if !self.singular_candidate() {
                continue;
            }

            self.state.endgame_attempts += 1;
            match self.endgame.run(
                &mut self.core,
                self.options.samples_per_loop,
                self.options.max_winding_number,
            ) {
                CauchyResult::Success { winding } => {
                    self.state.winding_number = winding;
                    self.state.solution.copy_from(self.endgame.prediction());
                    self.state.endgame_solution = true;
                    self.state.status = PathStatus::Success;
                    break;
                }
                CauchyResult::MaxWindingExceeded => {
                    // Keep tracking toward 0 and retry at a smaller radius.
                    let accepted = self.core.state.accepted_steps;
                    let rejected = self.core.state.rejected_steps;
                    let resume_x = self.core.state.x.clone();
                    let resume_t = self.core.state.t;
                    self.core
                        .setup(&resume_x, resume_t, Complex::new(0.0, 0.0));
                    self.core.state.accepted_steps = accepted;
                    self.core.state.rejected_steps = rejected;
                    // `setup` restores the default step size; the resumed
                    // step must stay within the endgame radius.
                    let radius_bound = (resume_t.norm() * 0.1)
                        .max(self.core.options.min_step_size);
                    self.core.state.step_size =
                        self.core.state.step_size.min(radius_bound);
                    continue;
                }
                CauchyResult::CoreFailure(status) => {
                    debug!(?status, "endgame failed");
                    self.state.status = PathStatus::TrackerFailed;
                    break;
                }
            }
        }

        self.finish()
    }

    /// Endgame precondition: nonnegative trustworthy valuations and either a
    /// fractional exponent or a distressed core tracker.
    fn singular_candidate(&self) -> bool {
        let min_acc = self.options.min_val_accuracy;
        match self.valuation.min_accurate_val(min_acc) {
            Some(min_val) if min_val > VAL_AT_INFINITY_BOUND => {}
            _ => return false,
        }
        let fractional = self
            .valuation
            .any_accurate_fractional(FRACTIONAL_VAL_TOL, min_acc);
        let state = &self.core.state;
        let distressed = state.digits_lost > DISTRESS_DIGITS_LOST
            || state.omega > DISTRESS_OMEGA
            || state.step_size < DISTRESS_STEP_SIZE;
        fractional || distressed
    }

    /// Classifies the endpoint, refines non-singular successes at t = 0 and
    /// packages the result record.
    fn finish(&mut self) -> PathResult {
        if self.state.status == PathStatus::Success && !self.state.endgame_solution {
            self.state.solution.copy_from(&self.core.state.x);
            self.state.t = 0.0;
        }
        if self.state.status != PathStatus::Success {
            self.state.solution.copy_from(&self.core.state.x);
        }

        // Late at-infinity catch on the affine chart of projective vectors.
        if self.state.status == PathStatus::Success
            && self.options.at_infinity_check
            && self.layout.is_projective()
            && self.layout.affine_chart_norm(&self.state.solution) > self.options.max_affine_norm
        {
            self.state.status = PathStatus::AtInfinity;
        }

        let mut accuracy = None;
        let mut residual = None;
        let mut condition = None;
        if self.state.status == PathStatus::Success {
            let t_zero = Complex::new(0.0, 0.0);
            if self.state.winding_number <= 1 {
                let iters = self.core.options.max_corrector_iters.max(3);
                if let Some((acc, res, cond)) =
                    self.core.refine(&mut self.state.solution, t_zero, iters)
                {
                    residual = Some(res);
                    condition = Some(cond);
                    // Accuracy is reported for non-singular endpoints only;
                    // an ill-conditioned Jacobian at t = 0 classifies the
                    // endpoint as singular even at winding one.
                    if cond <= SINGULAR_COND_TOL {
                        accuracy = Some(acc);
                    }
                }
            } else {
                let (res, cond) = self.core.diagnose(&self.state.solution, t_zero);
                residual = Some(res);
                condition = cond;
            }
        }

        let winding = if self.state.winding_number > 0 {
            Some(self.state.winding_number)
        } else {
            None
        };
        let (valuation, valuation_accuracy) = if self.valuation.updates() >= 2 {
            (
                Some(self.valuation.val.clone()),
                Some(self.valuation.val_accuracy.clone()),
            )
        } else {
            (None, None)
        };

        PathResult {
            return_code: self.state.status,
            solution: self.layout.pull_back(&self.state.solution),
            t: self.state.t,
            accuracy,
            residual,
            condition_jacobian: condition,
            winding_number: winding,
            endgame_zone_start: self.state.endgame_zone_start,
            accepted_steps: self.core.state.accepted_steps,
            rejected_steps: self.core.state.rejected_steps,
            valuation,
            valuation_accuracy,
        }
    }
}
