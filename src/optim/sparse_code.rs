//! # Sparse-Code Solver
//!
//! Per-patch coordinate descent for `min_a ½‖x − D a‖² + λ‖a‖₁`.
//!
//! For coordinate `j`, holding the rest fixed, the exact minimizer is
//! `a_j ← soft_threshold(d_jᵀ r, λ) / ‖d_j‖²` with the partial residual
//! `r = x − D a + d_j a_j`. The solver works in Gram form: with `G = DᵀD`
//! it keeps `c = Dᵀx − G a` up to date, so `d_jᵀ r = c_j + G_jj a_j` and every
//! coordinate update costs `O(k)`.
//!
//! Patches never share mutable state, so columns are solved on the rayon pool
//! when `parallel` is set.

use super::CoordinateOrder;
use crate::error::InputError;
use crate::matrix::{soft_threshold, CodeMatrix, Dictionary, MatrixOps, PatchBatch, Scalar, NORM_FLOOR};
use crate::utils::parallel;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Settings for one sparse-coding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Sparsity weight λ. Values `≤ 0` mean plain least squares.
    pub lambda: Scalar,
    /// Pass budget per patch; one pass is `k` coordinate updates.
    pub max_passes: usize,
    /// A patch has converged once no coefficient moves more than this in a pass.
    pub tolerance: Scalar,
    pub order: CoordinateOrder,
    pub parallel: bool,
    /// Seeds the per-patch permutations of [`CoordinateOrder::Random`].
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            lambda: 0.1,
            max_passes: 200,
            tolerance: 1e-8,
            order: CoordinateOrder::Cyclic,
            parallel: true,
            seed: 0,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), InputError> {
        if !self.lambda.is_finite() {
            return Err(InputError::InvalidConfig(format!("lambda must be finite, got {}", self.lambda)));
        }
        if self.max_passes == 0 {
            return Err(InputError::InvalidConfig("max_code_passes must be at least 1".into()));
        }
        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(InputError::InvalidConfig(format!(
                "eps_code must be a non-negative finite number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Convergence summary of one [`SparseCodeSolver::solve`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeReport {
    /// λ actually applied (negative inputs are clamped to 0).
    pub lambda: Scalar,
    /// Most passes any single patch needed.
    pub max_passes: usize,
    pub mean_passes: Scalar,
    /// Patches that used the whole pass budget without meeting the tolerance.
    pub stalled_patches: usize,
    /// All-zero patches, answered with an all-zero code without iterating.
    pub zero_patches: usize,
}

impl CodeReport {
    pub fn stalled(&self) -> bool {
        self.stalled_patches > 0
    }
}

/// Outcome for a single patch.
struct ColumnSolution {
    code: Array1<Scalar>,
    passes: usize,
    converged: bool,
    zero_patch: bool,
}

/// Quantities shared by every patch of one call.
struct Problem<'a> {
    gram: &'a Array2<Scalar>,
    /// `G_jj`, or 0 for atoms too small to use.
    diag: Vec<Scalar>,
    lambda: Scalar,
}

impl Problem<'_> {
    /// Closed-form optimum of coordinate `j` given the current `c` and `a`.
    #[inline]
    fn optimum(&self, j: usize, c: &Array1<Scalar>, a: &Array1<Scalar>) -> Scalar {
        let g = self.diag[j];
        if g == 0.0 {
            return 0.0;
        }
        soft_threshold(c[j] + g * a[j], self.lambda) / g
    }

    /// Moves coordinate `j` to `value`, keeping `c = Dᵀx − G a` in sync.
    /// Returns the absolute change.
    #[inline]
    fn set(&self, j: usize, value: Scalar, c: &mut Array1<Scalar>, a: &mut Array1<Scalar>) -> Scalar {
        let delta = value - a[j];
        if delta != 0.0 {
            a[j] = value;
            c.scaled_add(-delta, &self.gram.column(j));
        }
        delta.abs()
    }
}

/// Coordinate-descent sparse coder.
#[derive(Debug, Clone)]
pub struct SparseCodeSolver {
    config: SolverConfig,
}

impl SparseCodeSolver {
    pub fn new(config: SolverConfig) -> Self {
        SparseCodeSolver { config }
    }

    /// Codes every patch of `batch` against `dictionary`.
    ///
    /// `warm_start`, when given, must be `k × n`; each column starts from its
    /// prior value instead of zero. Running out of passes is not an error: the
    /// best iterate is kept and counted in [`CodeReport::stalled_patches`].
    pub fn solve(
        &self,
        dictionary: &Dictionary,
        batch: &PatchBatch,
        warm_start: Option<&CodeMatrix>,
    ) -> Result<(CodeMatrix, CodeReport), InputError> {
        self.config.validate()?;
        dictionary.check_compatible(batch)?;
        let k = dictionary.num_atoms();
        let n = batch.num_patches();
        if let Some(prior) = warm_start {
            if prior.num_atoms() != k {
                return Err(InputError::DimensionMismatch {
                    what: "warm-start code rows",
                    expected: k,
                    got: prior.num_atoms(),
                });
            }
            if prior.num_patches() != n {
                return Err(InputError::DimensionMismatch {
                    what: "warm-start code columns",
                    expected: n,
                    got: prior.num_patches(),
                });
            }
        }

        let atoms = dictionary.atoms();
        let atoms_t = atoms.transposed();
        let gram = atoms_t.multiply(atoms);
        let correlations = atoms_t.multiply(batch.data());
        let problem = Problem {
            gram: &gram,
            diag: gram
                .diag()
                .iter()
                .map(|&g| if g < NORM_FLOOR { 0.0 } else { g })
                .collect(),
            lambda: self.config.lambda.max(0.0),
        };

        let solutions = parallel::map_indices(n, self.config.parallel, |i| {
            self.solve_column(
                &problem,
                batch.patch(i),
                correlations.column(i),
                warm_start.map(|prior| prior.code(i)),
                i,
            )
        });

        let mut codes = Array2::zeros((k, n));
        let mut report = CodeReport {
            lambda: problem.lambda,
            max_passes: 0,
            mean_passes: 0.0,
            stalled_patches: 0,
            zero_patches: 0,
        };
        let mut total_passes = 0usize;
        for (i, (mut column, solution)) in codes.axis_iter_mut(Axis(1)).zip(solutions).enumerate() {
            column.assign(&solution.code);
            total_passes += solution.passes;
            report.max_passes = report.max_passes.max(solution.passes);
            if !solution.converged {
                report.stalled_patches += 1;
                log::trace!("patch {i} did not converge in {} passes", solution.passes);
            }
            if solution.zero_patch {
                report.zero_patches += 1;
            }
        }
        report.mean_passes = total_passes as Scalar / n as Scalar;
        Ok((CodeMatrix::from_raw(codes), report))
    }

    fn solve_column(
        &self,
        problem: &Problem<'_>,
        patch: ArrayView1<'_, Scalar>,
        correlation: ArrayView1<'_, Scalar>,
        start: Option<ArrayView1<'_, Scalar>>,
        index: usize,
    ) -> ColumnSolution {
        let k = correlation.len();
        if patch.iter().all(|v| *v == 0.0) {
            return ColumnSolution {
                code: Array1::zeros(k),
                passes: 0,
                converged: true,
                zero_patch: true,
            };
        }

        let mut a = match start {
            Some(prior) => prior.to_owned(),
            None => Array1::zeros(k),
        };
        // Unusable atoms carry no coefficient.
        for j in 0..k {
            if problem.diag[j] == 0.0 {
                a[j] = 0.0;
            }
        }
        let mut c = &correlation - &problem.gram.dot(&a);

        let tolerance = self.config.tolerance;
        let mut rng = match self.config.order {
            CoordinateOrder::Random => Some(StdRng::seed_from_u64(patch_seed(self.config.seed, index))),
            _ => None,
        };
        let mut order: Vec<usize> = (0..k).collect();

        for pass in 1..=self.config.max_passes {
            let max_change = match self.config.order {
                CoordinateOrder::Cyclic => sweep(problem, &order, &mut c, &mut a),
                CoordinateOrder::Random => {
                    if let Some(rng) = rng.as_mut() {
                        order.shuffle(rng);
                    }
                    sweep(problem, &order, &mut c, &mut a)
                }
                CoordinateOrder::Greedy => greedy_pass(problem, tolerance, &mut c, &mut a),
            };
            if max_change < tolerance {
                return ColumnSolution {
                    code: a,
                    passes: pass,
                    converged: true,
                    zero_patch: false,
                };
            }
        }

        ColumnSolution {
            code: a,
            passes: self.config.max_passes,
            converged: false,
            zero_patch: false,
        }
    }
}

/// One pass over `order`; returns the largest coefficient change.
fn sweep(problem: &Problem<'_>, order: &[usize], c: &mut Array1<Scalar>, a: &mut Array1<Scalar>) -> Scalar {
    let mut max_change: Scalar = 0.0;
    for &j in order {
        let target = problem.optimum(j, c, a);
        max_change = max_change.max(problem.set(j, target, c, a));
    }
    max_change
}

/// Up to `k` greedy steps, each on the coordinate with the largest closed-form
/// move. Stops early once the best available move is below `tolerance`.
fn greedy_pass(problem: &Problem<'_>, tolerance: Scalar, c: &mut Array1<Scalar>, a: &mut Array1<Scalar>) -> Scalar {
    let k = a.len();
    let mut max_change: Scalar = 0.0;
    for _ in 0..k {
        let mut best = (0, 0.0, 0.0);
        for j in 0..k {
            let target = problem.optimum(j, c, a);
            let change = (target - a[j]).abs();
            if change > best.2 {
                best = (j, target, change);
            }
        }
        let (j, target, change) = best;
        if change < tolerance {
            max_change = max_change.max(change);
            break;
        }
        max_change = max_change.max(problem.set(j, target, c, a));
    }
    max_change
}

/// Per-patch RNG seed, independent of which thread solves the patch.
fn patch_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Sparse-codes `batch` with a fixed `dictionary` (inference only, no warm start).
pub fn encode_with(
    batch: &PatchBatch,
    dictionary: &Dictionary,
    config: &SolverConfig,
) -> Result<CodeMatrix, InputError> {
    super::warn_if_unpenalized(config.lambda);
    let (codes, report) = SparseCodeSolver::new(config.clone()).solve(dictionary, batch, None)?;
    if report.stalled() {
        log::debug!(
            "encode: {} of {} patches hit the {}-pass budget",
            report.stalled_patches,
            batch.num_patches(),
            config.max_passes
        );
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::objective;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn config(lambda: Scalar, order: CoordinateOrder) -> SolverConfig {
        SolverConfig {
            lambda,
            max_passes: 500,
            tolerance: 1e-12,
            order,
            parallel: false,
            seed: 3,
        }
    }

    #[test]
    fn identity_dictionary_gives_soft_thresholded_patches() {
        let batch = PatchBatch::new(array![[2.0, -0.1], [-0.5, 0.0], [0.05, 3.0]]).unwrap();
        let dict = Dictionary::from_atoms(Array2::eye(3)).unwrap();
        let (codes, report) = SparseCodeSolver::new(config(0.2, CoordinateOrder::Cyclic))
            .solve(&dict, &batch, None)
            .unwrap();
        let expected = batch.data().soft_threshold(0.2);
        for (got, want) in codes.coefficients().iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-12);
        }
        assert_eq!(report.stalled_patches, 0);
    }

    #[test]
    fn all_orders_reach_the_same_minimum() {
        let dict = Dictionary::random(6, 10, 11).unwrap();
        let batch = PatchBatch::new(Array2::from_shape_fn((6, 4), |(i, j)| ((i * 7 + j * 3) % 5) as Scalar - 2.0)).unwrap();
        let objectives: Vec<Scalar> = [CoordinateOrder::Cyclic, CoordinateOrder::Random, CoordinateOrder::Greedy]
            .into_iter()
            .map(|order| {
                let (codes, _) = SparseCodeSolver::new(config(0.3, order)).solve(&dict, &batch, None).unwrap();
                objective(&batch, &dict, &codes, 0.3).total
            })
            .collect();
        assert_abs_diff_eq!(objectives[0], objectives[1], epsilon = 1e-6);
        assert_abs_diff_eq!(objectives[0], objectives[2], epsilon = 1e-6);
    }

    #[test]
    fn pass_budget_is_respected_and_stalls_reported() {
        let dict = Dictionary::random(8, 24, 5).unwrap();
        let batch = PatchBatch::new(Array2::from_shape_fn((8, 3), |(i, j)| (i as Scalar - j as Scalar).sin())).unwrap();
        let cfg = SolverConfig {
            max_passes: 1,
            tolerance: 0.0,
            ..config(0.01, CoordinateOrder::Cyclic)
        };
        let (_, report) = SparseCodeSolver::new(cfg).solve(&dict, &batch, None).unwrap();
        assert_eq!(report.max_passes, 1);
        assert_eq!(report.stalled_patches, 3);
    }

    #[test]
    fn warm_start_from_optimum_converges_in_one_pass() {
        let dict = Dictionary::random(5, 7, 2).unwrap();
        let batch = PatchBatch::new(Array2::from_shape_fn((5, 2), |(i, j)| (i + 2 * j) as Scalar * 0.3)).unwrap();
        let solver = SparseCodeSolver::new(SolverConfig {
            tolerance: 1e-9,
            ..config(0.1, CoordinateOrder::Cyclic)
        });
        let (codes, _) = solver.solve(&dict, &batch, None).unwrap();
        let (again, report) = solver.solve(&dict, &batch, Some(&codes)).unwrap();
        assert!(report.max_passes <= 2, "warm start needed {} passes", report.max_passes);
        for (a, b) in codes.coefficients().iter().zip(again.coefficients().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn mismatched_warm_start_is_rejected() {
        let dict = Dictionary::random(3, 2, 0).unwrap();
        let batch = PatchBatch::new(Array2::ones((3, 4))).unwrap();
        let prior = CodeMatrix::zeros(2, 5);
        let err = SparseCodeSolver::new(SolverConfig::default())
            .solve(&dict, &batch, Some(&prior))
            .unwrap_err();
        assert!(matches!(err, InputError::DimensionMismatch { expected: 4, got: 5, .. }));
    }

    #[test]
    fn zero_patch_ignores_warm_start() {
        let dict = Dictionary::random(3, 3, 9).unwrap();
        let batch = PatchBatch::new(array![[0.0, 1.0], [0.0, 2.0], [0.0, 3.0]]).unwrap();
        let prior = CodeMatrix::from_coefficients(Array2::ones((3, 2))).unwrap();
        let (codes, report) = SparseCodeSolver::new(SolverConfig::default())
            .solve(&dict, &batch, Some(&prior))
            .unwrap();
        assert!(codes.code(0).iter().all(|v| *v == 0.0));
        assert_eq!(report.zero_patches, 1);
    }

    #[test]
    fn parallel_and_sequential_agree_exactly() {
        let dict = Dictionary::random(9, 12, 4).unwrap();
        let batch = PatchBatch::new(Array2::from_shape_fn((9, 300), |(i, j)| ((i * 31 + j * 17) % 13) as Scalar / 13.0 - 0.5)).unwrap();
        let mut cfg = config(0.05, CoordinateOrder::Random);
        cfg.tolerance = 1e-6;
        let (seq, _) = SparseCodeSolver::new(cfg.clone()).solve(&dict, &batch, None).unwrap();
        cfg.parallel = true;
        let (par, _) = SparseCodeSolver::new(cfg).solve(&dict, &batch, None).unwrap();
        assert_eq!(seq, par);
    }
}
