//! Affine and projective solution-vector layouts.
//!
//! All tracker numerics operate on the extended vector; the layout knows how
//! to embed user coordinates, pull tracked points back, and dehomogenize
//! per-coordinate valuations.

use nalgebra::DVector;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// One homogeneous group of coordinates with its designated homogenization
/// variable. Indices refer to positions in the extended vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HomogeneousGroup {
    pub coords: Vec<usize>,
    pub hom_var: usize,
}

/// Layout of the tracked vector: raw affine coordinates, or a projective
/// vector partitioned into homogeneous groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VectorLayout {
    Affine(usize),
    Projective {
        dim: usize,
        groups: Vec<HomogeneousGroup>,
    },
}

impl VectorLayout {
    pub fn affine(n: usize) -> Self {
        VectorLayout::Affine(n)
    }

    /// The common single-group projective layout: `n` affine coordinates
    /// followed by one homogenization variable at index `n`.
    pub fn projective_single(n: usize) -> Self {
        VectorLayout::Projective {
            dim: n + 1,
            groups: vec![HomogeneousGroup {
                coords: (0..n).collect(),
                hom_var: n,
            }],
        }
    }

    /// Length of the extended vector the trackers operate on.
    pub fn len(&self) -> usize {
        match self {
            VectorLayout::Affine(n) => *n,
            VectorLayout::Projective { dim, .. } => *dim,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of user (affine) coordinates.
    pub fn affine_len(&self) -> usize {
        match self {
            VectorLayout::Affine(n) => *n,
            VectorLayout::Projective { dim, groups } => *dim - groups.len(),
        }
    }

    pub fn is_projective(&self) -> bool {
        matches!(self, VectorLayout::Projective { .. })
    }

    /// Lifts user coordinates into the tracked representation. For
    /// projective layouts the homogenization variables are set to 1.
    pub fn embed(&self, user: &[Complex<f64>]) -> DVector<Complex<f64>> {
        assert_eq!(user.len(), self.affine_len(), "user coordinate count");
        match self {
            VectorLayout::Affine(_) => DVector::from_column_slice(user),
            VectorLayout::Projective { dim, groups } => {
                let mut out = DVector::from_element(*dim, Complex::new(0.0, 0.0));
                let mut next = 0;
                for group in groups {
                    for &i in &group.coords {
                        out[i] = user[next];
                        next += 1;
                    }
                    out[group.hom_var] = Complex::new(1.0, 0.0);
                }
                out
            }
        }
    }

    /// Maps a tracked vector back to user coordinates, dividing each group
    /// by its homogenization variable.
    pub fn pull_back(&self, x: &DVector<Complex<f64>>) -> Vec<Complex<f64>> {
        match self {
            VectorLayout::Affine(_) => x.iter().cloned().collect(),
            VectorLayout::Projective { groups, .. } => {
                let mut out = Vec::with_capacity(self.affine_len());
                for group in groups {
                    let h = x[group.hom_var];
                    for &i in &group.coords {
                        out.push(x[i] / h);
                    }
                }
                out
            }
        }
    }

    /// Euclidean norm of the point on its affine chart. For affine layouts
    /// this is the plain norm.
    pub fn affine_chart_norm(&self, x: &DVector<Complex<f64>>) -> f64 {
        match self {
            VectorLayout::Affine(_) => x.norm(),
            VectorLayout::Projective { .. } => {
                let user = self.pull_back(x);
                user.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt()
            }
        }
    }

    /// Converts raw per-coordinate valuations of the extended vector into
    /// affine valuations, subtracting the homogenization variable's
    /// valuation within each group.
    pub fn dehomogenize_valuations(&self, raw: &[f64], out: &mut [f64]) {
        debug_assert_eq!(raw.len(), self.len());
        debug_assert_eq!(out.len(), self.affine_len());
        match self {
            VectorLayout::Affine(_) => out.copy_from_slice(raw),
            VectorLayout::Projective { groups, .. } => {
                let mut next = 0;
                for group in groups {
                    let hom_val = raw[group.hom_var];
                    for &i in &group.coords {
                        out[next] = raw[i] - hom_val;
                        next += 1;
                    }
                }
            }
        }
    }
}
