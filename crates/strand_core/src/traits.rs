use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

/// A homotopy H(x, t): ℂⁿ × ℂ → ℂⁿ between a start system G = H(·, 1) and a
/// target system F = H(·, 0).
///
/// Implementations take `&mut self` so they can keep scratch buffers and cache
/// the most recent evaluation point; repeated calls at the same (x, t) must be
/// cheap. Overflow (NaN/Inf) is propagated numerically, never reported as an
/// error.
pub trait Homotopy {
    /// Number of equations, which equals the number of variables.
    fn dimension(&self) -> usize;

    /// Evaluates H(x, t) into `out`.
    fn evaluate(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    );

    /// Evaluates the Jacobian ∂H/∂x at (x, t) into `out`.
    fn jacobian_x(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DMatrix<Complex<f64>>,
    );

    /// Evaluates ∂H/∂t at (x, t) into `out`.
    fn jacobian_t(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        out: &mut DVector<Complex<f64>>,
    );

    /// Combined residual and Jacobian evaluation. The default just chains the
    /// two calls; caching implementations override this to share work.
    fn evaluate_and_jacobian(
        &mut self,
        x: &DVector<Complex<f64>>,
        t: Complex<f64>,
        residual: &mut DVector<Complex<f64>>,
        jacobian: &mut DMatrix<Complex<f64>>,
    ) {
        self.evaluate(x, t, residual);
        self.jacobian_x(x, t, jacobian);
    }

    /// Re-centers the affine patch on `x` for projective homotopies.
    /// Affine homotopies ignore this.
    fn update_patch(&mut self, _x: &DVector<Complex<f64>>) {}
}
