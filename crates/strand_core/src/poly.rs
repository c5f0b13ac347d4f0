//! Sparse multivariate polynomial systems over ℂ.
//!
//! Polynomials are flat term lists (coefficient + exponent vector). This is
//! the evaluation substrate for the straight-line homotopy; parsing and
//! symbolic manipulation live outside this crate.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub coefficient: Complex<f64>,
    pub exponents: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polynomial {
    pub n_vars: usize,
    pub terms: Vec<Term>,
}

impl Polynomial {
    pub fn zero(n_vars: usize) -> Self {
        Self {
            n_vars,
            terms: Vec::new(),
        }
    }

    /// Appends `c · x₀^e₀·…·x_{n−1}^e_{n−1}`. Panics on an exponent vector of
    /// the wrong length; building systems is programmer-driven, not input
    /// parsing.
    pub fn add_term(&mut self, coefficient: Complex<f64>, exponents: &[u16]) -> &mut Self {
        assert_eq!(
            exponents.len(),
            self.n_vars,
            "exponent vector length must match variable count"
        );
        self.terms.push(Term {
            coefficient,
            exponents: exponents.to_vec(),
        });
        self
    }

    /// Total degree (0 for the zero polynomial).
    pub fn degree(&self) -> usize {
        self.terms
            .iter()
            .map(|term| term.exponents.iter().map(|&e| e as usize).sum())
            .max()
            .unwrap_or(0)
    }

    pub fn evaluate(&self, x: &DVector<Complex<f64>>) -> Complex<f64> {
        let mut acc = Complex::new(0.0, 0.0);
        for term in &self.terms {
            let mut prod = term.coefficient;
            for (j, &e) in term.exponents.iter().enumerate() {
                if e > 0 {
                    prod *= x[j].powu(e as u32);
                }
            }
            acc += prod;
        }
        acc
    }

    /// Evaluates ∂p/∂x_j.
    pub fn evaluate_partial(&self, x: &DVector<Complex<f64>>, j: usize) -> Complex<f64> {
        let mut acc = Complex::new(0.0, 0.0);
        for term in &self.terms {
            let ej = term.exponents[j];
            if ej == 0 {
                continue;
            }
            let mut prod = term.coefficient * Complex::new(ej as f64, 0.0);
            for (k, &e) in term.exponents.iter().enumerate() {
                let e = if k == j { e - 1 } else { e };
                if e > 0 {
                    prod *= x[k].powu(e as u32);
                }
            }
            acc += prod;
        }
        acc
    }

    /// Homogenization to degree `target_degree` with a fresh variable
    /// appended at index `n_vars`.
    fn homogenized(&self, target_degree: usize) -> Polynomial {
        let mut out = Polynomial::zero(self.n_vars + 1);
        for term in &self.terms {
            let total: usize = term.exponents.iter().map(|&e| e as usize).sum();
            let mut exponents = term.exponents.clone();
            exponents.push((target_degree - total) as u16);
            out.terms.push(Term {
                coefficient: term.coefficient,
                exponents,
            });
        }
        out
    }
}

/// A square-or-rectangular system of polynomials sharing one variable set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolynomialSystem {
    pub n_vars: usize,
    pub polys: Vec<Polynomial>,
}

impl PolynomialSystem {
    pub fn new(polys: Vec<Polynomial>) -> Result<Self> {
        if polys.is_empty() {
            bail!("Polynomial system must contain at least one polynomial.");
        }
        let n_vars = polys[0].n_vars;
        if polys.iter().any(|p| p.n_vars != n_vars) {
            bail!("All polynomials in a system must share the variable count.");
        }
        Ok(Self { n_vars, polys })
    }

    pub fn n_polys(&self) -> usize {
        self.polys.len()
    }

    pub fn degrees(&self) -> Vec<usize> {
        self.polys.iter().map(|p| p.degree()).collect()
    }

    /// Product of the total degrees, i.e. the Bézout path count for a
    /// total-degree start system.
    pub fn total_degree(&self) -> usize {
        self.degrees().iter().product()
    }

    pub fn evaluate_into(&self, x: &DVector<Complex<f64>>, out: &mut DVector<Complex<f64>>) {
        for (i, p) in self.polys.iter().enumerate() {
            out[i] = p.evaluate(x);
        }
    }

    pub fn jacobian_into(&self, x: &DVector<Complex<f64>>, out: &mut DMatrix<Complex<f64>>) {
        for (i, p) in self.polys.iter().enumerate() {
            for j in 0..self.n_vars {
                out[(i, j)] = p.evaluate_partial(x, j);
            }
        }
    }

    /// Homogenizes every polynomial to its own total degree with one shared
    /// homogenization variable appended after the affine variables. The
    /// result has `n_vars + 1` variables and the same number of polynomials.
    pub fn homogenized(&self) -> PolynomialSystem {
        let polys = self
            .polys
            .iter()
            .map(|p| p.homogenized(p.degree()))
            .collect();
        PolynomialSystem {
            n_vars: self.n_vars + 1,
            polys,
        }
    }
}
