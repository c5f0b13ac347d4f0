//! Puiseux valuation estimates along a path.
//!
//! For a branch x_i(t) = c·t^{ω_i} + … the valuation satisfies
//! ω_i(t) = t·Re(x_i·conj(ẋ_i))/|x_i|², so it can be read off the tracked
//! point and its path derivative after every accepted step. Negative
//! valuations flag divergence, fractional ones flag singular endpoints.

use nalgebra::DVector;
use num_complex::Complex;

use crate::vector::VectorLayout;

/// Valuation and valuation-accuracy estimates for the affine coordinates,
/// with one step of history for the acceptance rule.
#[derive(Debug, Clone)]
pub struct ValuationEstimator {
    pub val: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub prev_val: Vec<f64>,
    pub prev_val_accuracy: Vec<f64>,
    raw: Vec<f64>,
    fresh: Vec<f64>,
    updates: usize,
}

impl ValuationEstimator {
    pub fn new(layout: &VectorLayout) -> Self {
        let n = layout.affine_len();
        Self {
            val: vec![0.0; n],
            val_accuracy: vec![f64::INFINITY; n],
            prev_val: vec![0.0; n],
            prev_val_accuracy: vec![f64::INFINITY; n],
            raw: vec![0.0; layout.len()],
            fresh: vec![0.0; n],
            updates: 0,
        }
    }

    pub fn reset(&mut self) {
        self.val.fill(0.0);
        self.val_accuracy.fill(f64::INFINITY);
        self.prev_val.fill(0.0);
        self.prev_val_accuracy.fill(f64::INFINITY);
        self.updates = 0;
    }

    /// Number of accepted steps that have fed the estimator since reset.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Feeds the estimator with the state after an accepted step. `t` is the
    /// current distance to the target and `delta_t` the t-distance covered
    /// by the step.
    pub fn update(
        &mut self,
        layout: &VectorLayout,
        x: &DVector<Complex<f64>>,
        x_dot: &DVector<Complex<f64>>,
        t: f64,
        delta_t: f64,
    ) {
        for i in 0..x.len() {
            let norm_sqr = x[i].norm_sqr();
            self.raw[i] = if norm_sqr > 0.0 {
                t * (x[i] * x_dot[i].conj()).re / norm_sqr
            } else {
                f64::INFINITY
            };
        }
        layout.dehomogenize_valuations(&self.raw, &mut self.fresh);

        let log_scale = if t > 0.0 && delta_t > 0.0 {
            (1.0 + delta_t / t).ln()
        } else {
            0.0
        };

        std::mem::swap(&mut self.prev_val, &mut self.val);
        std::mem::swap(&mut self.prev_val_accuracy, &mut self.val_accuracy);
        for i in 0..self.fresh.len() {
            let new_val = self.fresh[i];
            self.val_accuracy[i] = if self.updates == 0 || log_scale == 0.0 {
                f64::INFINITY
            } else {
                (new_val - self.prev_val[i]).abs() / log_scale
            };
            self.val[i] = new_val;
        }
        self.updates += 1;
    }

    /// A coordinate's valuation counts as accurate once the previous
    /// estimate was already below the threshold and the current one either
    /// improved on it or dropped below its square.
    pub fn is_accurate(&self, i: usize, min_val_accuracy: f64) -> bool {
        self.prev_val_accuracy[i] < min_val_accuracy
            && (self.val_accuracy[i] < self.prev_val_accuracy[i]
                || self.val_accuracy[i] < min_val_accuracy * min_val_accuracy)
    }

    pub fn all_accurate(&self, min_val_accuracy: f64) -> bool {
        (0..self.val.len()).all(|i| self.is_accurate(i, min_val_accuracy))
    }

    /// True when some coordinate has an accurate valuation below `bound`.
    /// This is the at-infinity test.
    pub fn any_accurate_below(&self, bound: f64, min_val_accuracy: f64) -> bool {
        (0..self.val.len()).any(|i| self.is_accurate(i, min_val_accuracy) && self.val[i] < bound)
    }

    /// True when some accurate valuation sits away from every integer, the
    /// fractional-exponent signal for the endgame.
    pub fn any_accurate_fractional(&self, tolerance: f64, min_val_accuracy: f64) -> bool {
        (0..self.val.len()).any(|i| {
            self.is_accurate(i, min_val_accuracy)
                && (self.val[i] - self.val[i].round()).abs() > tolerance
        })
    }

    pub fn min_accurate_val(&self, min_val_accuracy: f64) -> Option<f64> {
        let mut min = None;
        for i in 0..self.val.len() {
            if self.is_accurate(i, min_val_accuracy) {
                min = Some(min.map_or(self.val[i], |m: f64| m.min(self.val[i])));
            }
        }
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    /// Feeds the estimator samples of x(t) = (t^w0, t^w1) along a shrinking
    /// sequence of t values.
    fn feed_powers(est: &mut ValuationEstimator, layout: &VectorLayout, w: [f64; 2], ts: &[f64]) {
        let mut t_prev = ts[0] * 1.25;
        for &t in ts {
            let x = DVector::from_vec(vec![
                c(t.powf(w[0]), 0.0),
                c(t.powf(w[1]), 0.0),
            ]);
            let x_dot = DVector::from_vec(vec![
                c(w[0] * t.powf(w[0] - 1.0), 0.0),
                c(w[1] * t.powf(w[1] - 1.0), 0.0),
            ]);
            est.update(layout, &x, &x_dot, t, t_prev - t);
            t_prev = t;
        }
    }

    #[test]
    fn test_valuation_of_pure_powers() {
        let layout = VectorLayout::affine(2);
        let mut est = ValuationEstimator::new(&layout);
        let ts: Vec<f64> = (0..12).map(|k| 0.1 * 0.7f64.powi(k)).collect();
        feed_powers(&mut est, &layout, [1.0, -0.5], &ts);

        assert!((est.val[0] - 1.0).abs() < 1e-9, "val0 = {}", est.val[0]);
        assert!((est.val[1] + 0.5).abs() < 1e-9, "val1 = {}", est.val[1]);
        assert!(est.all_accurate(1e-3));
        assert!(est.any_accurate_below(-0.05, 1e-3));
        assert!(est.any_accurate_fractional(0.1, 1e-3));
        assert_eq!(est.min_accurate_val(1e-3), Some(est.val[1]));
    }

    #[test]
    fn test_accuracy_requires_history() {
        let layout = VectorLayout::affine(2);
        let mut est = ValuationEstimator::new(&layout);
        let ts = [0.1, 0.07];
        feed_powers(&mut est, &layout, [1.0, 1.0], &ts);
        // Two updates: the current accuracy exists but the previous one is
        // still infinite, so nothing is accurate yet.
        assert_eq!(est.updates(), 2);
        assert!(!est.all_accurate(1e-3));
        assert!(!est.any_accurate_below(-0.05, 1e-3));
    }

    #[test]
    fn test_zero_coordinate_never_accurate() {
        let layout = VectorLayout::affine(1);
        let mut est = ValuationEstimator::new(&layout);
        let x = DVector::from_vec(vec![c(0.0, 0.0)]);
        let x_dot = DVector::from_vec(vec![c(1.0, 0.0)]);
        for k in 0..5 {
            let t = 0.1 * 0.5f64.powi(k);
            est.update(&layout, &x, &x_dot, t, t);
        }
        assert!(!est.all_accurate(1e-3));
    }

    #[test]
    fn test_reset_clears_history() {
        let layout = VectorLayout::affine(2);
        let mut est = ValuationEstimator::new(&layout);
        let ts: Vec<f64> = (0..10).map(|k| 0.1 * 0.7f64.powi(k)).collect();
        feed_powers(&mut est, &layout, [0.0, 0.0], &ts);
        assert!(est.all_accurate(1e-3));
        est.reset();
        assert_eq!(est.updates(), 0);
        assert!(!est.all_accurate(1e-3));
    }

    #[test]
    fn test_projective_dehomogenization() {
        // Extended vector (x, z) with one group; x ~ t^0, z ~ t^1 means the
        // affine coordinate x/z diverges with valuation −1.
        let layout = VectorLayout::projective_single(1);
        let mut est = ValuationEstimator::new(&layout);
        let mut t_prev = 0.125;
        for k in 0..12 {
            let t = 0.1 * 0.7f64.powi(k);
            let x = DVector::from_vec(vec![c(1.0, 0.0), c(t, 0.0)]);
            let x_dot = DVector::from_vec(vec![c(0.0, 0.0), c(1.0, 0.0)]);
            est.update(&layout, &x, &x_dot, t, t_prev - t);
            t_prev = t;
        }
        assert_eq!(est.val.len(), 1);
        assert!((est.val[0] + 1.0).abs() < 1e-9, "val = {}", est.val[0]);
        assert!(est.any_accurate_below(-0.05, 1e-3));
    }
}
