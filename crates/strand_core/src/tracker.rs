//! Predictor–corrector path tracking between two values of t.
//!
//! `CoreTracker` advances a solution of H(x(t), t) = 0 along the straight
//! segment from `t_from` to `t_to` in the complex t-plane, parametrized by
//! real arclength s. Each `step` is exactly one predictor–corrector attempt:
//! an RK4 extrapolation along the Davidenko ODE J_x·ẋ = −∂H/∂t followed by a
//! Newton correction at the new t, accepted or rejected by the step
//! controller.

pub mod cauchy;
pub mod path;
pub mod result;
pub mod valuation;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::linalg;
use crate::traits::Homotopy;

/// Start residuals above `accuracy * INVALID_START_FACTOR` terminate setup.
const INVALID_START_FACTOR: f64 = 1e3;
/// Newton contraction rate the controller steers toward.
const OMEGA_TARGET: f64 = 10.0;
/// Multiplicative shrink applied to the step size on rejection.
const STEP_SHRINK: f64 = 0.25;
/// Condition estimates above this make the corrector report ill-conditioning.
const MAX_COND: f64 = 1e14;

fn default_accuracy() -> f64 {
    1e-7
}

fn default_max_corrector_iters() -> usize {
    3
}

fn default_max_steps() -> usize {
    10_000
}

fn default_initial_step_size() -> f64 {
    0.05
}

fn default_min_step_size() -> f64 {
    1e-14
}

fn default_max_step_size() -> f64 {
    0.25
}

fn default_update_patch() -> bool {
    true
}

/// Options of the core tracker. `accuracy`, `max_corrector_iters` and
/// `max_steps` can be overridden per call via [`CoreOptionOverrides`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoreTrackerOptions {
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
    #[serde(default = "default_max_corrector_iters")]
    pub max_corrector_iters: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_initial_step_size")]
    pub initial_step_size: f64,
    #[serde(default = "default_min_step_size")]
    pub min_step_size: f64,
    #[serde(default = "default_max_step_size")]
    pub max_step_size: f64,
    #[serde(default = "default_update_patch")]
    pub update_patch: bool,
}

impl Default for CoreTrackerOptions {
    fn default() -> Self {
        Self {
            accuracy: default_accuracy(),
            max_corrector_iters: default_max_corrector_iters(),
            max_steps: default_max_steps(),
            initial_step_size: default_initial_step_size(),
            min_step_size: default_min_step_size(),
            max_step_size: default_max_step_size(),
            update_patch: default_update_patch(),
        }
    }
}

/// Per-call overrides of the re-entrant tracker options; previous values are
/// restored before the call returns.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CoreOptionOverrides {
    pub accuracy: Option<f64>,
    pub max_corrector_iters: Option<usize>,
    pub max_steps: Option<usize>,
}

/// Terminal and non-terminal states of the core tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoreStatus {
    Tracking,
    Success,
    TerminatedInvalidStartValue,
    TerminatedMaxIters,
    TerminatedStepSizeTooSmall,
    TerminatedSingularity,
    TerminatedIllConditioned,
}

/// Cause of the most recent rejected step; decides which terminal status a
/// step-size collapse maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailCause {
    Singular,
    Diverged,
    IllConditioned,
}

/// Mutable per-path state of the core tracker.
#[derive(Debug, Clone)]
pub struct CoreTrackerState {
    pub x: DVector<Complex<f64>>,
    pub t: Complex<f64>,
    pub x_prev: DVector<Complex<f64>>,
    pub t_prev: Complex<f64>,
    /// dx/dt along the path at the current point.
    pub x_dot: DVector<Complex<f64>>,
    /// Controller step size (arclength in t).
    pub step_size: f64,
    pub step_size_prev: f64,
    /// Arclength progress along the current segment.
    pub s: f64,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub last_step_failed: bool,
    /// Newton contraction rate estimate of the last corrector run.
    pub omega: f64,
    /// ≈ log10 of the Jacobian condition estimate.
    pub digits_lost: f64,
    /// ‖H(x, t)‖ after the last accepted step.
    pub accuracy: f64,
    pub cond: f64,
    pub status: CoreStatus,
}

impl CoreTrackerState {
    fn new(dim: usize) -> Self {
        Self {
            x: DVector::zeros(dim),
            t: Complex::new(0.0, 0.0),
            x_prev: DVector::zeros(dim),
            t_prev: Complex::new(0.0, 0.0),
            x_dot: DVector::zeros(dim),
            step_size: 0.0,
            step_size_prev: 0.0,
            s: 0.0,
            accepted_steps: 0,
            rejected_steps: 0,
            last_step_failed: false,
            omega: 0.0,
            digits_lost: 0.0,
            accuracy: 0.0,
            cond: 1.0,
            status: CoreStatus::Tracking,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.accepted_steps + self.rejected_steps
    }
}

/// Straight segment in the complex t-plane, parametrized by arclength.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: Complex<f64>,
    dir: Complex<f64>,
    length: f64,
}

impl Segment {
    fn new(t_from: Complex<f64>, t_to: Complex<f64>) -> Self {
        let delta = t_to - t_from;
        let length = delta.norm();
        let dir = if length > 0.0 {
            delta / Complex::new(length, 0.0)
        } else {
            Complex::new(1.0, 0.0)
        };
        Self {
            start: t_from,
            dir,
            length,
        }
    }

    fn t_at(&self, s: f64) -> Complex<f64> {
        self.start + self.dir * Complex::new(s, 0.0)
    }

    fn end(&self) -> Complex<f64> {
        self.t_at(self.length)
    }
}

enum CorrectorResult {
    Converged {
        omega: f64,
        digits_lost: f64,
        cond: f64,
        residual_norm: f64,
    },
    Diverged,
    IllConditioned { digits_lost: f64, cond: f64 },
    Singular,
}

/// Predictor–corrector tracker: RK4 extrapolation along the path, Newton
/// correction at the new t, and adaptive step control between two t-values.
#[derive(Debug, Clone)]
pub struct CoreTracker<H: Homotopy> {
    homotopy: H,
    pub options: CoreTrackerOptions,
    pub state: CoreTrackerState,
    segment: Segment,
    // Scratch buffers, reused across steps.
    residual: DVector<Complex<f64>>,
    jacobian: DMatrix<Complex<f64>>,
    h_t: DVector<Complex<f64>>,
    k1: DVector<Complex<f64>>,
    k2: DVector<Complex<f64>>,
    k3: DVector<Complex<f64>>,
    k4: DVector<Complex<f64>>,
    x_trial: DVector<Complex<f64>>,
    stage: DVector<Complex<f64>>,
}

impl<H: Homotopy> CoreTracker<H> {
    pub fn new(homotopy: H, options: CoreTrackerOptions) -> Self {
        let dim = homotopy.dimension();
        Self {
            homotopy,
            options,
            state: CoreTrackerState::new(dim),
            segment: Segment::new(Complex::new(1.0, 0.0), Complex::new(0.0, 0.0)),
            residual: DVector::zeros(dim),
            jacobian: DMatrix::zeros(dim, dim),
            h_t: DVector::zeros(dim),
            k1: DVector::zeros(dim),
            k2: DVector::zeros(dim),
            k3: DVector::zeros(dim),
            k4: DVector::zeros(dim),
            x_trial: DVector::zeros(dim),
            stage: DVector::zeros(dim),
        }
    }

    /// Resets the tracker onto the segment `t_from → t_to` starting at `x0`.
    ///
    /// Rejects start values whose residual exceeds the accuracy by more than
    /// a fixed factor. A zero-length segment succeeds immediately.
    pub fn setup(
        &mut self,
        x0: &DVector<Complex<f64>>,
        t_from: Complex<f64>,
        t_to: Complex<f64>,
    ) {
        self.segment = Segment::new(t_from, t_to);
        let dim = self.homotopy.dimension();
        self.state = CoreTrackerState::new(dim);
        self.state.x.copy_from(x0);
        self.state.x_prev.copy_from(x0);
        self.state.t = t_from;
        self.state.t_prev = t_from;
        self.state.step_size = self.options.initial_step_size;
        self.state.step_size_prev = self.options.initial_step_size;

        if self.options.update_patch {
            self.homotopy.update_patch(&self.state.x);
        }

        self.homotopy
            .evaluate(&self.state.x, self.state.t, &mut self.residual);
        let res_norm = self.residual.norm();
        self.state.accuracy = res_norm;
        if !res_norm.is_finite() || res_norm > self.options.accuracy * INVALID_START_FACTOR {
            self.state.status = CoreStatus::TerminatedInvalidStartValue;
            return;
        }

        if let Some((x_dot, _cond)) = self.current_derivative() {
            self.state.x_dot = x_dot;
        }

        if self.segment.length == 0.0 {
            self.state.status = CoreStatus::Success;
        }
    }

    /// One predictor–corrector attempt with the current step size. Exactly
    /// one accepted or rejected step per call.
    pub fn step(&mut self) {
        debug_assert_eq!(self.state.status, CoreStatus::Tracking);

        let remaining = self.segment.length - self.state.s;
        let h = self.state.step_size.min(remaining);
        let s_next = self.state.s + h;
        let t_next = if s_next >= self.segment.length {
            self.segment.end()
        } else {
            self.segment.t_at(s_next)
        };

        if !self.predict(h) {
            self.reject(FailCause::Singular);
            return;
        }

        match self.correct(t_next) {
            CorrectorResult::Converged {
                omega,
                digits_lost,
                cond,
                residual_norm,
            } => {
                self.state.x_prev.copy_from(&self.state.x);
                self.state.t_prev = self.state.t;
                self.state.x.copy_from(&self.x_trial);
                self.state.t = t_next;
                self.state.s = s_next;
                self.state.omega = omega;
                self.state.digits_lost = digits_lost;
                self.state.cond = cond;
                self.state.accuracy = residual_norm;
                self.state.accepted_steps += 1;
                self.state.last_step_failed = false;

                if self.options.update_patch {
                    self.homotopy.update_patch(&self.state.x);
                }
                if let Some((x_dot, _)) = self.current_derivative() {
                    self.state.x_dot = x_dot;
                }

                self.state.step_size_prev = self.state.step_size;
                let factor = growth_factor(omega);
                self.state.step_size =
                    (self.state.step_size * factor).min(self.options.max_step_size);

                trace!(
                    s = self.state.s,
                    step_size = self.state.step_size,
                    omega,
                    digits_lost,
                    "accepted step"
                );

                if self.state.s >= self.segment.length {
                    self.state.t = self.segment.end();
                    self.state.status = CoreStatus::Success;
                }
            }
            CorrectorResult::Diverged => self.reject(FailCause::Diverged),
            CorrectorResult::Singular => self.reject(FailCause::Singular),
            CorrectorResult::IllConditioned { digits_lost, cond } => {
                self.state.digits_lost = digits_lost;
                self.state.cond = cond;
                self.reject(FailCause::IllConditioned);
            }
        }
    }

    /// Tracks `x0` from `t_from` to `t_to`, looping `step` until a terminal
    /// status or the step budget is reached.
    pub fn track(
        &mut self,
        x0: &DVector<Complex<f64>>,
        t_from: Complex<f64>,
        t_to: Complex<f64>,
    ) -> CoreStatus {
        self.setup(x0, t_from, t_to);
        while self.state.status == CoreStatus::Tracking {
            if self.state.total_steps() >= self.options.max_steps {
                self.state.status = CoreStatus::TerminatedMaxIters;
                break;
            }
            self.step();
        }
        self.state.status
    }

    /// Re-entrant `track` with per-call option overrides; the previous
    /// options are restored before returning.
    pub fn track_with_options(
        &mut self,
        x0: &DVector<Complex<f64>>,
        t_from: Complex<f64>,
        t_to: Complex<f64>,
        overrides: CoreOptionOverrides,
    ) -> CoreStatus {
        let saved = self.options;
        if let Some(accuracy) = overrides.accuracy {
            self.options.accuracy = accuracy;
        }
        if let Some(iters) = overrides.max_corrector_iters {
            self.options.max_corrector_iters = iters;
        }
        if let Some(steps) = overrides.max_steps {
            self.options.max_steps = steps;
        }
        let status = self.track(x0, t_from, t_to);
        self.options = saved;
        status
    }

    /// Newton-refines `x` on H(·, t) in place. Returns the final update
    /// norm, residual norm and condition estimate on convergence.
    pub fn refine(
        &mut self,
        x: &mut DVector<Complex<f64>>,
        t: Complex<f64>,
        max_iters: usize,
    ) -> Option<(f64, f64, f64)> {
        self.x_trial.copy_from(x);
        let mut last_norm = f64::INFINITY;
        let mut cond = 1.0;
        for _ in 0..max_iters {
            self.homotopy
                .evaluate_and_jacobian(&self.x_trial, t, &mut self.residual, &mut self.jacobian);
            let outcome = linalg::solve_equilibrated(&self.jacobian, &self.residual)?;
            cond = outcome.cond_estimate;
            self.x_trial -= &outcome.solution;
            last_norm = outcome.solution.norm();
            if last_norm <= self.options.accuracy {
                break;
            }
        }
        if !last_norm.is_finite() {
            return None;
        }
        self.homotopy
            .evaluate(&self.x_trial, t, &mut self.residual);
        let res_norm = self.residual.norm();
        if !res_norm.is_finite() {
            return None;
        }
        x.copy_from(&self.x_trial);
        Some((last_norm, res_norm, cond))
    }

    /// Residual norm and condition estimate at an arbitrary point, used to
    /// report diagnostics for endpoints that cannot be refined.
    pub fn diagnose(&mut self, x: &DVector<Complex<f64>>, t: Complex<f64>) -> (f64, Option<f64>) {
        self.homotopy
            .evaluate_and_jacobian(x, t, &mut self.residual, &mut self.jacobian);
        let residual_norm = self.residual.norm();
        let cond = linalg::solve_equilibrated(&self.jacobian, &self.residual)
            .map(|outcome| outcome.cond_estimate);
        (residual_norm, cond)
    }

    fn reject(&mut self, cause: FailCause) {
        self.state.rejected_steps += 1;
        self.state.last_step_failed = true;
        self.state.step_size_prev = self.state.step_size;
        self.state.step_size *= STEP_SHRINK;
        trace!(step_size = self.state.step_size, ?cause, "rejected step");
        if self.state.step_size < self.options.min_step_size {
            self.state.status = match cause {
                FailCause::Singular => CoreStatus::TerminatedSingularity,
                FailCause::IllConditioned => CoreStatus::TerminatedIllConditioned,
                FailCause::Diverged => CoreStatus::TerminatedStepSizeTooSmall,
            };
        }
    }

    /// Solves J_x·ẋ = −∂H/∂t at the current point. Returns dx/dt and the
    /// condition estimate.
    fn current_derivative(&mut self) -> Option<(DVector<Complex<f64>>, f64)> {
        self.stage.copy_from(&self.state.x);
        self.stage_derivative(self.state.t)
    }

    /// Same solve at (`stage`, t), used for the predictor stages.
    fn stage_derivative(&mut self, t: Complex<f64>) -> Option<(DVector<Complex<f64>>, f64)> {
        let point = self.stage.clone();
        self.homotopy.jacobian_x(&point, t, &mut self.jacobian);
        self.homotopy.jacobian_t(&point, t, &mut self.h_t);
        let outcome = linalg::solve_equilibrated(&self.jacobian, &self.h_t)?;
        let mut x_dot = outcome.solution;
        for v in x_dot.iter_mut() {
            *v = -*v;
        }
        Some((x_dot, outcome.cond_estimate))
    }

    /// RK4 extrapolation along the segment by arclength `h`, writing the
    /// predicted point into `x_trial`. Returns false when a stage Jacobian
    /// is singular.
    fn predict(&mut self, h: f64) -> bool {
        let dim = self.state.x.len();
        let dir = self.segment.dir;
        let s = self.state.s;

        // dx/ds = dx/dt · dt/ds, and dt/ds is the constant segment direction.
        for i in 0..dim {
            self.k1[i] = self.state.x_dot[i] * dir;
        }

        let half = 0.5 * h;
        for i in 0..dim {
            self.stage[i] = self.state.x[i] + self.k1[i] * Complex::new(half, 0.0);
        }
        let t_half = self.segment.t_at(s + half);
        let Some((dot, _)) = self.stage_derivative(t_half) else {
            return false;
        };
        for i in 0..dim {
            self.k2[i] = dot[i] * dir;
        }

        for i in 0..dim {
            self.stage[i] = self.state.x[i] + self.k2[i] * Complex::new(half, 0.0);
        }
        let Some((dot, _)) = self.stage_derivative(t_half) else {
            return false;
        };
        for i in 0..dim {
            self.k3[i] = dot[i] * dir;
        }

        for i in 0..dim {
            self.stage[i] = self.state.x[i] + self.k3[i] * Complex::new(h, 0.0);
        }
        let t_full = self.segment.t_at(s + h);
        let Some((dot, _)) = self.stage_derivative(t_full) else {
            return false;
        };
        for i in 0..dim {
            self.k4[i] = dot[i] * dir;
        }

        let sixth = Complex::new(h / 6.0, 0.0);
        let two = Complex::new(2.0, 0.0);
        for i in 0..dim {
            self.x_trial[i] = self.state.x[i]
                + sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }
        true
    }

    /// Newton iteration on H(·, t) starting from the prediction in
    /// `x_trial`, refining it in place.
    fn correct(&mut self, t: Complex<f64>) -> CorrectorResult {
        let mut norm_prev: Option<f64> = None;
        let mut omega = 0.0f64;
        let mut cond = 1.0f64;

        for _ in 0..self.options.max_corrector_iters {
            self.homotopy
                .evaluate_and_jacobian(&self.x_trial, t, &mut self.residual, &mut self.jacobian);
            let Some(outcome) = linalg::solve_equilibrated(&self.jacobian, &self.residual) else {
                return CorrectorResult::Singular;
            };
            cond = outcome.cond_estimate;
            if cond > MAX_COND {
                return CorrectorResult::IllConditioned {
                    digits_lost: linalg::digits_lost(cond),
                    cond,
                };
            }

            self.x_trial -= &outcome.solution;
            let norm_delta = outcome.solution.norm();
            if !norm_delta.is_finite() {
                return CorrectorResult::Diverged;
            }

            if let Some(prev) = norm_prev {
                if prev > 0.0 {
                    omega = norm_delta / (prev * prev);
                }
                if norm_delta > 2.0 * prev {
                    return CorrectorResult::Diverged;
                }
            }

            if norm_delta <= self.options.accuracy {
                if !omega.is_finite() {
                    return CorrectorResult::Diverged;
                }
                self.homotopy
                    .evaluate(&self.x_trial, t, &mut self.residual);
                let residual_norm = self.residual.norm();
                if !residual_norm.is_finite() {
                    return CorrectorResult::Diverged;
                }
                return CorrectorResult::Converged {
                    omega,
                    digits_lost: linalg::digits_lost(cond),
                    cond,
                    residual_norm,
                };
            }
            norm_prev = Some(norm_delta);
        }

        CorrectorResult::Diverged
    }
}

/// Step growth on acceptance, steering the Newton contraction rate toward
/// its target. Very small contraction rates (excellent predictions) earn the
/// largest growth; rates above target shrink the step slightly even though
/// the step was accepted.
fn growth_factor(omega: f64) -> f64 {
    if omega <= 0.0 || !omega.is_finite() {
        return 4.0;
    }
    (0.9 * (OMEGA_TARGET / omega).powf(0.25)).clamp(0.1, 4.0)
}
