//! Straight-line homotopies between polynomial systems.
//!
//! H(x, t) = t·γ·G(x) + (1 − t)·F(x) with a random unit γ, so that for
//! generic γ every path is smooth on t ∈ (0, 1]. `PatchedHomotopy` appends
//! one affine-patch row for projective tracking.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::poly::PolynomialSystem;
use crate::traits::Homotopy;

/// Draws the γ constant uniformly from the unit circle.
pub fn random_gamma(seed: u64) -> Complex<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let phase: f64 = rng.gen::<f64>() * std::f64::consts::TAU;
    Complex::from_polar(1.0, phase)
}

/// H(x, t) = t·γ·G(x) + (1 − t)·F(x).
///
/// G(x) and F(x) are cached for the most recent evaluation point, so
/// residual and ∂H/∂t evaluations at the same x do not re-walk the term
/// lists; t only enters through the cheap linear combination.
#[derive(Debug, Clone)]
pub struct StraightLineHomotopy {
    start: PolynomialSystem,
    target: PolynomialSystem,
    gamma: Complex<f64>,
    n_eqs: usize,
    n_vars: usize,
    // Last evaluation point and the per-system values at it.
    cache_x: DVector<Complex<f64>>,
    cache_valid: bool,
    g_vals: DVector<Complex<f64>>,
    f_vals: DVector<Complex<f64>>,
    g_jac: DMatrix<Complex<f64>>,
    f_jac: DMatrix<Complex<f64>>,
}

impl StraightLineHomotopy {
    pub fn new(
        start: PolynomialSystem,
        target: PolynomialSystem,
        gamma: Complex<f64>,
    ) -> Result<Self> {
        if start.n_vars != target.n_vars {
            bail!("Start and target systems must share the variable count.");
        }
        if start.n_polys() != target.n_polys() {
            bail!("Start and target systems must have the same number of polynomials.");
        }
        let n_eqs = target.n_polys();
        let n_vars = target.n_vars;
        Ok(Self {
            start,
            target,
            gamma,
            n_eqs,
            n_vars,
            cache_x: DVector::zeros(n_vars),
            cache_valid: false,
            g_vals: DVector::zeros(n_eqs),
            f_vals: DVector::zeros(n_eqs),
            g_jac: DMatrix::zeros(n_eqs, n_vars),
            f_jac: DMatrix::zeros(n_eqs, n_vars),
        })
    }

    pub fn n_eqs(&self) -> usize {
        self.n_eqs
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn gamma(&self) -> Complex<f64> {
        self.gamma
    }

    fn refresh_values(&mut self, x: &DVector<Complex<f64>>) {
        if self.cache_valid && self.cache_x == *x {
            return;
        }
        self.start.evaluate_into(x, &mut self.g_vals);
        self.target.evaluate_into(x, &mut self.f_vals);
        self.cache_x.copy_from(x);
        self.cache_valid = true;
    }

    /// Writes H(x, t) into the first `n_eqs` entries of `out`.
    pub fn eval_into(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    ) {
        self.refresh_values(x);
        let tg = t * self.gamma;
        let one_minus_t = Complex::new(1.0, 0.0) - t;
        for i in 0..self.n_eqs {
            out[i] = tg * self.g_vals[i] + one_minus_t * self.f_vals[i];
        }
    }

    /// Writes ∂H/∂x into the top `n_eqs` rows of `out`.
    pub fn jac_x_into(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DMatrix<Complex<f64>>,
    ) {
        self.start.jacobian_into(x, &mut self.g_jac);
        self.target.jacobian_into(x, &mut self.f_jac);
        let tg = t * self.gamma;
        let one_minus_t = Complex::new(1.0, 0.0) - t;
        for i in 0..self.n_eqs {
            for j in 0..self.n_vars {
                out[(i, j)] = tg * self.g_jac[(i, j)] + one_minus_t * self.f_jac[(i, j)];
            }
        }
    }

    /// Writes ∂H/∂t = γ·G(x) − F(x) into the first `n_eqs` entries of `out`.
    pub fn jac_t_into(
        &mut self,
        x: &DVector<Complex<f64>>,
        _t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    ) {
        self.refresh_values(x);
        for i in 0..self.n_eqs {
            out[i] = self.gamma * self.g_vals[i] - self.f_vals[i];
        }
    }
}

impl Homotopy for StraightLineHomotopy {
    fn dimension(&self) -> usize {
        debug_assert_eq!(self.n_eqs, self.n_vars, "homotopy must be square");
        self.n_vars
    }

    fn evaluate(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    ) {
        self.eval_into(x, t, out);
    }

    fn jacobian_x(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DMatrix<Complex<f64>>,
    ) {
        self.jac_x_into(x, t, out);
    }

    fn jacobian_t(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    ) {
        self.jac_t_into(x, t, out);
    }
}

/// A homogeneous straight-line homotopy (n equations in n + 1 variables)
/// closed up to a square system by one affine-patch row ⟨v̄, x⟩ − 1.
///
/// The patch vector is re-centered on demand via `update_patch`; holding it
/// fixed is what the Cauchy endgame relies on.
#[derive(Debug, Clone)]
pub struct PatchedHomotopy {
    inner: StraightLineHomotopy,
    patch: DVector<Complex<f64>>,
}

impl PatchedHomotopy {
    pub fn new(inner: StraightLineHomotopy) -> Result<Self> {
        if inner.n_eqs() + 1 != inner.n_vars() {
            bail!("Patched homotopy expects n equations in n + 1 variables.");
        }
        let n_vars = inner.n_vars();
        let mut patch = DVector::from_element(n_vars, Complex::new(0.0, 0.0));
        // Start on the standard chart; callers re-center before tracking.
        patch[n_vars - 1] = Complex::new(1.0, 0.0);
        Ok(Self { inner, patch })
    }

    pub fn patch(&self) -> &DVector<Complex<f64>> {
        &self.patch
    }
}

impl Homotopy for PatchedHomotopy {
    fn dimension(&self) -> usize {
        self.inner.n_vars()
    }

    fn evaluate(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    ) {
        let n = self.inner.n_eqs();
        self.inner.eval_into(x, t, out);
        let mut row = Complex::new(-1.0, 0.0);
        for i in 0..x.len() {
            row += self.patch[i] * x[i];
        }
        out[n] = row;
    }

    fn jacobian_x(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DMatrix<Complex<f64>>,
    ) {
        let n = self.inner.n_eqs();
        self.inner.jac_x_into(x, t, out);
        for j in 0..x.len() {
            out[(n, j)] = self.patch[j];
        }
    }

    fn jacobian_t(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    ) {
        let n = self.inner.n_eqs();
        self.inner.jac_t_into(x, t, out);
        out[n] = Complex::new(0.0, 0.0);
    }

    fn update_patch(&mut self, x: &DVector<Complex<f64>>) {
        let norm_sqr: f64 = x.iter().map(|v| v.norm_sqr()).sum();
        if norm_sqr == 0.0 || !norm_sqr.is_finite() {
            return;
        }
        let scale = Complex::new(1.0 / norm_sqr, 0.0);
        for i in 0..x.len() {
            self.patch[i] = x[i].conj() * scale;
        }
    }
}
