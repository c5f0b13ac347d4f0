//! Dense complex linear algebra used by the trackers.
//!
//! Provides a row-equilibrated LU solve with a cheap condition estimate, the
//! norms the endgame needs, and the process-wide linear-algebra thread guard
//! that brackets every `track` call.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of a linear solve, carrying the conditioning diagnostics the
/// corrector reports upward.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub solution: DVector<Complex<f64>>,
    /// Cheap condition estimate from the LU diagonal.
    pub cond_estimate: f64,
}

/// Solves A·x = b after scaling each row by its max-norm.
///
/// Returns `None` when A is numerically singular (a zero row, a zero pivot,
/// or a non-finite solution). The condition estimate is the ratio of the
/// largest to smallest pivot magnitude of the equilibrated factorization; it
/// is a lower bound on the true condition number but tracks its growth well
/// enough for step control.
pub fn solve_equilibrated(
    a: &DMatrix<Complex<f64>>,
    b: &DVector<Complex<f64>>,
) -> Option<SolveOutcome> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    debug_assert_eq!(n, b.len());

    let mut scaled = a.clone();
    let mut rhs = b.clone();
    for i in 0..n {
        let mut row_max = 0.0f64;
        for j in 0..n {
            row_max = row_max.max(scaled[(i, j)].norm());
        }
        if row_max == 0.0 || !row_max.is_finite() {
            return None;
        }
        let inv = Complex::new(1.0 / row_max, 0.0);
        for j in 0..n {
            scaled[(i, j)] *= inv;
        }
        rhs[i] *= inv;
    }

    let lu = scaled.lu();
    let diag = lu.u().diagonal();
    let mut pivot_max = 0.0f64;
    let mut pivot_min = f64::INFINITY;
    for p in diag.iter() {
        let mag = p.norm();
        pivot_max = pivot_max.max(mag);
        pivot_min = pivot_min.min(mag);
    }
    if pivot_min == 0.0 || !pivot_max.is_finite() {
        return None;
    }

    let solution = lu.solve(&rhs)?;
    if solution.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
        return None;
    }

    Some(SolveOutcome {
        solution,
        cond_estimate: pivot_max / pivot_min,
    })
}

/// Decimal digits lost to ill-conditioning, ≈ log10 of the condition number.
pub fn digits_lost(cond_estimate: f64) -> f64 {
    cond_estimate.max(1.0).log10()
}

/// Euclidean norm of the imaginary parts, used by the realness classifier.
pub fn imag_norm(v: &[Complex<f64>]) -> f64 {
    v.iter().map(|c| c.im * c.im).sum::<f64>().sqrt()
}

/// Euclidean distance between two vectors.
pub fn distance(a: &DVector<Complex<f64>>, b: &DVector<Complex<f64>>) -> f64 {
    let mut sum = 0.0;
    for i in 0..a.len() {
        sum += (a[i] - b[i]).norm_sqr();
    }
    sum.sqrt()
}

// Process-wide thread budget for the inner linear algebra. 0 means "library
// default". Trackers pin this to 1 for the duration of a track because they
// are themselves run from outer parallelism.
static LA_THREAD_BUDGET: AtomicUsize = AtomicUsize::new(0);

/// Current linear-algebra thread budget (0 = library default).
pub fn la_thread_budget() -> usize {
    LA_THREAD_BUDGET.load(Ordering::SeqCst)
}

/// Sets the linear-algebra thread budget, returning the previous value.
pub fn set_la_thread_budget(n: usize) -> usize {
    LA_THREAD_BUDGET.swap(n, Ordering::SeqCst)
}

/// RAII guard pinning the linear-algebra thread budget to a single thread.
///
/// The previous budget is restored on drop, so every exit path of a track,
/// including a panicking debug assertion, leaves the process-wide setting
/// as it was found.
#[derive(Debug)]
pub struct LinAlgThreadGuard {
    previous: usize,
}

impl LinAlgThreadGuard {
    pub fn pin_single() -> Self {
        Self {
            previous: set_la_thread_budget(1),
        }
    }
}

impl Drop for LinAlgThreadGuard {
    fn drop(&mut self) {
        LA_THREAD_BUDGET.store(self.previous, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    #[test]
    fn test_solve_identity() {
        let a = DMatrix::identity(3, 3);
        let b = DVector::from_vec(vec![c(1.0, 0.0), c(0.0, 2.0), c(-1.0, 1.0)]);
        let out = solve_equilibrated(&a, &b).expect("identity solve");
        for i in 0..3 {
            assert!((out.solution[i] - b[i]).norm() < 1e-14);
        }
        assert!(out.cond_estimate < 10.0);
    }

    #[test]
    fn test_solve_complex_system() {
        // (1+i)·x = 2 → x = 1 − i
        let a = DMatrix::from_element(1, 1, c(1.0, 1.0));
        let b = DVector::from_element(1, c(2.0, 0.0));
        let out = solve_equilibrated(&a, &b).expect("1x1 solve");
        assert!((out.solution[0] - c(1.0, -1.0)).norm() < 1e-14);
    }

    #[test]
    fn test_solve_singular_returns_none() {
        let a = DMatrix::from_row_slice(
            2,
            2,
            &[c(1.0, 0.0), c(2.0, 0.0), c(2.0, 0.0), c(4.0, 0.0)],
        );
        let b = DVector::from_vec(vec![c(1.0, 0.0), c(1.0, 0.0)]);
        assert!(solve_equilibrated(&a, &b).is_none());
    }

    #[test]
    fn test_equilibration_handles_badly_scaled_rows() {
        let a = DMatrix::from_row_slice(
            2,
            2,
            &[c(1e12, 0.0), c(1e12, 0.0), c(1.0, 0.0), c(-1.0, 0.0)],
        );
        let b = DVector::from_vec(vec![c(2e12, 0.0), c(0.0, 0.0)]);
        let out = solve_equilibrated(&a, &b).expect("scaled solve");
        assert!((out.solution[0] - c(1.0, 0.0)).norm() < 1e-9);
        assert!((out.solution[1] - c(1.0, 0.0)).norm() < 1e-9);
        // After equilibration the system is well conditioned.
        assert!(out.cond_estimate < 1e3, "cond = {}", out.cond_estimate);
    }

    #[test]
    fn test_digits_lost_monotone() {
        assert_eq!(digits_lost(0.5), 0.0);
        assert!((digits_lost(1e6) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_thread_guard_restores_budget() {
        let before = la_thread_budget();
        {
            let _guard = LinAlgThreadGuard::pin_single();
            assert_eq!(la_thread_budget(), 1);
            {
                // Nested guards restore in LIFO order.
                let _inner = LinAlgThreadGuard::pin_single();
                assert_eq!(la_thread_budget(), 1);
            }
            assert_eq!(la_thread_budget(), 1);
        }
        assert_eq!(la_thread_budget(), before);
    }
}
