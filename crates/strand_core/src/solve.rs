//! Driver: total-degree homotopies, parallel path tracking, endpoint
//! aggregation and the path-jumping cure.
//!
//! Each worker owns its tracker; there is no shared mutable state between
//! paths. When two start solutions collide onto the same nonsingular
//! endpoint, the offending starts are retracked with tightened accuracy and
//! fewer corrector iterations until the endpoints separate or the retry
//! budget is exhausted.

use anyhow::{bail, Result};
use num_complex::Complex;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::homotopy::{random_gamma, StraightLineHomotopy};
use crate::poly::{Polynomial, PolynomialSystem};
use crate::tracker::path::{PathTracker, PathTrackerOptions};
use crate::tracker::result::PathResult;
use crate::tracker::{CoreOptionOverrides, CoreTrackerOptions};
use crate::vector::VectorLayout;

/// Endpoints closer than this count as one solution.
const COLLISION_TOL: f64 = 1e-5;
/// Retracking rounds before giving up on a collision cluster.
const MAX_JUMP_ROUNDS: i32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    pub core: CoreTrackerOptions,
    pub path: PathTrackerOptions,
    /// Detect and cure endpoint collisions across start solutions.
    pub path_jumping_check: bool,
    /// Seed of the γ constant; fixed seeds give reproducible runs.
    pub seed: u64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            core: CoreTrackerOptions::default(),
            path: PathTrackerOptions::default(),
            path_jumping_check: true,
            seed: 1,
        }
    }
}

/// Builds the total-degree start system G = { x_i^{d_i} − 1 } and its
/// d₁·…·d_n root-of-unity start solutions.
pub fn total_degree_start(
    target: &PolynomialSystem,
) -> Result<(PolynomialSystem, Vec<Vec<Complex<f64>>>)> {
    let n = target.n_vars;
    if target.n_polys() != n {
        bail!(
            "Total-degree start systems need a square target ({} equations, {} variables).",
            target.n_polys(),
            n
        );
    }
    let degrees = target.degrees();
    if degrees.iter().any(|&d| d == 0) {
        bail!("Every target polynomial must have positive degree.");
    }

    let mut polys = Vec::with_capacity(n);
    for (i, &d) in degrees.iter().enumerate() {
        let mut exps = vec![0u16; n];
        exps[i] = d as u16;
        let mut p = Polynomial::zero(n);
        p.add_term(Complex::new(1.0, 0.0), &exps)
            .add_term(Complex::new(-1.0, 0.0), &vec![0u16; n]);
        polys.push(p);
    }
    let start = PolynomialSystem::new(polys)?;

    let total: usize = degrees.iter().product();
    let mut starts = Vec::with_capacity(total);
    for mut k in 0..total {
        let mut solution = Vec::with_capacity(n);
        for &d in &degrees {
            let r = k % d;
            k /= d;
            let phase = std::f64::consts::TAU * r as f64 / d as f64;
            solution.push(Complex::from_polar(1.0, phase));
        }
        starts.push(solution);
    }

    Ok((start, starts))
}

/// Tracks every total-degree path of `target` and returns one result per
/// start solution, in start-solution order.
pub fn solve(target: &PolynomialSystem, options: SolveOptions) -> Result<Vec<PathResult>> {
    let (start, start_solutions) = total_degree_start(target)?;
    let gamma = random_gamma(options.seed);
    let template = StraightLineHomotopy::new(start, target.clone(), gamma)?;
    let layout = VectorLayout::affine(target.n_vars);

    // Validate construction once so the per-worker clones cannot fail.
    PathTracker::new(template.clone(), layout.clone(), options.core, options.path)?;

    debug!(
        paths = start_solutions.len(),
        seed = options.seed,
        "tracking total-degree homotopy"
    );

    let mut results: Vec<PathResult> = start_solutions
        .par_iter()
        .map_init(
            || {
                PathTracker::new(template.clone(), layout.clone(), options.core, options.path)
                    .expect("tracker construction was validated")
            },
            |tracker, start| tracker.track(start.as_slice()),
        )
        .collect();

    if options.path_jumping_check {
        cure_path_jumps(&template, &layout, &options, &start_solutions, &mut results);
    }

    Ok(results)
}

/// Indices worth retracking: nonsingular successes whose endpoint coincides
/// with another path's endpoint, plus outright failures. Singular endpoints
/// are exempt from the collision test: coincidence there is a
/// multiplicity, not a jump.
fn collision_indices(results: &[PathResult]) -> Vec<usize> {
    let mut offending = vec![false; results.len()];
    for i in 0..results.len() {
        if results[i].is_failed() {
            offending[i] = true;
            continue;
        }
        if !results[i].is_nonsingular() {
            continue;
        }
        for j in (i + 1)..results.len() {
            if !results[j].is_nonsingular() {
                continue;
            }
            if solution_distance(&results[i].solution, &results[j].solution) < COLLISION_TOL {
                offending[i] = true;
                offending[j] = true;
            }
        }
    }
    offending
        .iter()
        .enumerate()
        .filter_map(|(i, &hit)| hit.then_some(i))
        .collect()
}

fn cure_path_jumps(
    template: &StraightLineHomotopy,
    layout: &VectorLayout,
    options: &SolveOptions,
    starts: &[Vec<Complex<f64>>],
    results: &mut [PathResult],
) {
    for round in 0..MAX_JUMP_ROUNDS {
        let offenders = collision_indices(results);
        if offenders.is_empty() {
            return;
        }
        let tightened = CoreOptionOverrides {
            accuracy: Some((options.core.accuracy * 1e-2f64.powi(round + 1)).max(1e-14)),
            max_corrector_iters: Some(2),
            max_steps: None,
        };
        warn!(
            colliding = offenders.len(),
            round,
            accuracy = tightened.accuracy.unwrap(),
            "path jumping detected, retracking"
        );

        let retracked: Vec<(usize, PathResult)> = offenders
            .par_iter()
            .map_init(
                || {
                    PathTracker::new(
                        template.clone(),
                        layout.clone(),
                        options.core,
                        options.path,
                    )
                    .expect("tracker construction was validated")
                },
                |tracker, &i| (i, tracker.track_with_options(starts[i].as_slice(), tightened)),
            )
            .collect();
        for (i, result) in retracked {
            results[i] = result;
        }
    }
}

fn solution_distance(a: &[Complex<f64>], b: &[Complex<f64>]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(u, v)| (u - v).norm_sqr())
        .sum::<f64>()
        .sqrt()
}

/// Representatives of the distinct nonsingular solutions among `results`.
pub fn distinct_nonsingular_solutions(
    results: &[PathResult],
    tol: f64,
) -> Vec<Vec<Complex<f64>>> {
    let mut reps: Vec<Vec<Complex<f64>>> = Vec::new();
    for result in results {
        if !result.is_nonsingular() {
            continue;
        }
        if reps
            .iter()
            .all(|rep| solution_distance(rep, &result.solution) >= tol)
        {
            reps.push(result.solution.clone());
        }
    }
    reps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    // F = { x² − 2, x + y − 1 }
    fn quadratic_with_line() -> PolynomialSystem {
        let mut f0 = Polynomial::zero(2);
        f0.add_term(c(1.0, 0.0), &[2, 0]).add_term(c(-2.0, 0.0), &[0, 0]);
        let mut f1 = Polynomial::zero(2);
        f1.add_term(c(1.0, 0.0), &[1, 0])
            .add_term(c(1.0, 0.0), &[0, 1])
            .add_term(c(-1.0, 0.0), &[0, 0]);
        PolynomialSystem::new(vec![f0, f1]).unwrap()
    }

    /// The Katsura-n benchmark: n quadrics plus one linear relation in n + 1
    /// variables, 2^n regular solutions.
    fn katsura(n: usize) -> PolynomialSystem {
        let vars = n + 1;
        let mut polys = Vec::with_capacity(vars);
        for m in 0..n {
            let mut p = Polynomial::zero(vars);
            for l in -(n as i64)..=(n as i64) {
                let a = l.unsigned_abs() as usize;
                let other = m as i64 - l;
                if other.unsigned_abs() as usize > n {
                    continue;
                }
                let b = other.unsigned_abs() as usize;
                let mut exps = vec![0u16; vars];
                exps[a] += 1;
                exps[b] += 1;
                p.add_term(c(1.0, 0.0), &exps);
            }
            let mut linear = vec![0u16; vars];
            linear[m] = 1;
            p.add_term(c(-1.0, 0.0), &linear);
            polys.push(p);
        }
        let mut p = Polynomial::zero(vars);
        let mut e0 = vec![0u16; vars];
        e0[0] = 1;
        p.add_term(c(1.0, 0.0), &e0);
        for l in 1..=n {
            let mut el = vec![0u16; vars];
            el[l] = 1;
            p.add_term(c(2.0, 0.0), &el);
        }
        p.add_term(c(-1.0, 0.0), &vec![0u16; vars]);
        polys.push(p);
        PolynomialSystem::new(polys).unwrap()
    }

    #[test]
    fn test_total_degree_start_counts() {
        let f = quadratic_with_line();
        let (start, starts) = total_degree_start(&f).unwrap();
        assert_eq!(start.degrees(), vec![2, 1]);
        assert_eq!(starts.len(), 2);
        // Every start solution is a root of the start system.
        let mut out = nalgebra::DVector::zeros(2);
        for s in &starts {
            let x = nalgebra::DVector::from_vec(s.clone());
            start.evaluate_into(&x, &mut out);
            assert!(out.norm() < 1e-12);
        }
    }

    #[test]
    fn test_quadratic_with_linear_constraint_has_two_real_roots() {
        let results = solve(&quadratic_with_line(), SolveOptions::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_success()));

        let sqrt2 = 2.0f64.sqrt();
        let mut found_plus = false;
        let mut found_minus = false;
        for r in &results {
            assert!(r.is_real(1e-6));
            assert!(r.residual.unwrap() < 1e-6);
            let x = r.solution[0];
            let y = r.solution[1];
            assert!((x + y - c(1.0, 0.0)).norm() < 1e-6);
            if (x - c(sqrt2, 0.0)).norm() < 1e-6 {
                found_plus = true;
            }
            if (x - c(-sqrt2, 0.0)).norm() < 1e-6 {
                found_minus = true;
            }
        }
        assert!(found_plus && found_minus);
    }

    #[test]
    fn test_double_root_reported_once_with_winding_two() {
        // F = { (x − 1)², y − 2 }: both paths land on the double root.
        let mut f0 = Polynomial::zero(2);
        f0.add_term(c(1.0, 0.0), &[2, 0])
            .add_term(c(-2.0, 0.0), &[1, 0])
            .add_term(c(1.0, 0.0), &[0, 0]);
        let mut f1 = Polynomial::zero(2);
        f1.add_term(c(1.0, 0.0), &[0, 1]).add_term(c(-2.0, 0.0), &[0, 0]);
        let f = PolynomialSystem::new(vec![f0, f1]).unwrap();

        let results = solve(&f, SolveOptions::default()).unwrap();
        assert_eq!(results.len(), 2);

        let singular: Vec<_> = results
            .iter()
            .filter(|r| r.is_success() && r.winding_number == Some(2))
            .collect();
        assert!(
            !singular.is_empty(),
            "expected a winding-2 endpoint, got {:?}",
            results.iter().map(|r| (r.return_code, r.winding_number)).collect::<Vec<_>>()
        );
        for r in &singular {
            assert!(r.is_singular());
            assert!((r.solution[0] - c(1.0, 0.0)).norm() < 1e-3);
            assert!((r.solution[1] - c(2.0, 0.0)).norm() < 1e-3);
        }
        // The double root is one distinct solution, not two.
        assert!(distinct_nonsingular_solutions(&results, 1e-4).len() <= 1);
    }

    #[test]
    fn test_katsura5_with_and_without_path_jumping_check() {
        let f = katsura(5);
        assert_eq!(f.total_degree(), 32);

        // Loose corrector tolerance and an uncapped step size: the tracker
        // takes strides comparable to the inter-path distance.
        let loose_core = CoreTrackerOptions {
            accuracy: 1e-3,
            max_corrector_iters: 5,
            max_step_size: 1.0,
            ..CoreTrackerOptions::default()
        };

        // Path jumping disabled: collisions survive and fewer than 32
        // distinct solutions come back.
        let unchecked = solve(
            &f,
            SolveOptions {
                core: loose_core,
                path_jumping_check: false,
                seed: 124_232,
                ..SolveOptions::default()
            },
        )
        .unwrap();
        assert_eq!(unchecked.len(), 32);
        let distinct_unchecked = distinct_nonsingular_solutions(&unchecked, 1e-4).len();
        assert!(
            distinct_unchecked < 32,
            "expected collisions without path-jumping check, got {}",
            distinct_unchecked
        );

        // With the cure enabled every one of the 32 regular solutions is
        // recovered.
        let checked = solve(
            &f,
            SolveOptions {
                core: loose_core,
                path_jumping_check: true,
                seed: 124_232,
                ..SolveOptions::default()
            },
        )
        .unwrap();
        assert_eq!(checked.len(), 32);
        assert_eq!(distinct_nonsingular_solutions(&checked, 1e-4).len(), 32);
    }

    #[test]
    fn test_path_jumping_check_defaults_to_enabled() {
        assert!(SolveOptions::default().path_jumping_check);
    }

    #[test]
    fn test_counters_accumulate_and_results_align_with_paths() {
        let results = solve(&quadratic_with_line(), SolveOptions::default()).unwrap();
        for r in &results {
            assert!(r.accepted_steps > 0);
            assert!(r.accepted_steps + r.rejected_steps >= r.accepted_steps);
        }
    }
}
