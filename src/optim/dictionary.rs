//! # Dictionary Updater
//!
//! Block-coordinate minimization of `½‖X − D A‖²_F` over the atoms with the
//! codes fixed (Mairal et al., batch mode). The accumulators `B = X Aᵀ` and
//! `C = A Aᵀ` are rebuilt from the full batch on every call; the atom sweep
//! itself is Gauss–Seidel and therefore sequential.

use crate::error::InputError;
use crate::matrix::ops::{l2_distance, l2_norm};
use crate::matrix::storage::gaussian_atom;
use crate::matrix::{CodeMatrix, Dictionary, MatrixOps, PatchBatch, Scalar, NORM_FLOOR};
use crate::utils::parallel;
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Settings for the atom sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Sweep budget per call.
    pub max_passes: usize,
    /// Stop sweeping once no atom moves further than this.
    pub tolerance: Scalar,
    /// Usage floor: atoms with `C[j,j]` below it are dead.
    pub c_min: Scalar,
    /// Re-seed dead atoms from badly reconstructed patches.
    pub resample: bool,
    pub parallel: bool,
    pub seed: u64,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        UpdaterConfig {
            max_passes: 10,
            tolerance: 1e-6,
            c_min: 1e-8,
            resample: true,
            parallel: true,
            seed: 0,
        }
    }
}

/// Summary of one [`DictionaryUpdater::update`] call.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UpdateReport {
    pub passes: usize,
    /// `false` when the sweep budget ran out before atom movement fell below tolerance.
    pub converged: bool,
    /// Largest single-atom movement in the final sweep.
    pub last_movement: Scalar,
    /// Dead atoms replaced by a normalized residual (or random atom).
    pub reseeded: Vec<usize>,
    /// Dead atoms left as they were: resampling is off, or the atom already
    /// holds a random direction and no residual is left to take.
    pub dead_untouched: Vec<usize>,
}

/// Updates dictionary atoms given the current codes.
#[derive(Debug, Clone)]
pub struct DictionaryUpdater {
    config: UpdaterConfig,
    rng: StdRng,
    /// Atoms whose current direction came from the random fallback.
    random_atoms: Vec<bool>,
}

impl DictionaryUpdater {
    pub fn new(config: UpdaterConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        DictionaryUpdater {
            config,
            rng,
            random_atoms: Vec::new(),
        }
    }

    /// `(B, C) = (X Aᵀ, A Aᵀ)` as a chunked sum over patches.
    pub fn accumulators(&self, batch: &PatchBatch, codes: &CodeMatrix) -> (Array2<Scalar>, Array2<Scalar>) {
        let x = batch.data();
        let a = codes.coefficients();
        let (d, k, n) = (x.nrows(), a.nrows(), a.ncols());
        let b = parallel::chunked_sum(n, (d, k), self.config.parallel, |range| {
            let a_chunk_t = a.slice(s![.., range.clone()]).transposed();
            x.slice(s![.., range]).multiply(&a_chunk_t)
        });
        let c = parallel::chunked_sum(n, (k, k), self.config.parallel, |range| {
            let a_chunk = a.slice(s![.., range]);
            a_chunk.multiply(&a_chunk.transposed())
        });
        (b, c)
    }

    /// Runs the atom sweep in place.
    ///
    /// `codes` is also modified: rows of re-seeded atoms are zeroed, and when an
    /// atom comes out of the sweep shorter than unit length it is rescaled to
    /// norm 1 while its code row absorbs the old norm. `D A` is unchanged by
    /// that rescaling and `‖A‖₁` can only shrink, so the joint objective does
    /// not go up. On return every atom has unit norm.
    pub fn update(
        &mut self,
        dictionary: &mut Dictionary,
        codes: &mut CodeMatrix,
        batch: &PatchBatch,
    ) -> Result<UpdateReport, InputError> {
        dictionary.check_compatible(batch)?;
        if codes.num_atoms() != dictionary.num_atoms() {
            return Err(InputError::DimensionMismatch {
                what: "code rows vs atom count",
                expected: dictionary.num_atoms(),
                got: codes.num_atoms(),
            });
        }
        if codes.num_patches() != batch.num_patches() {
            return Err(InputError::DimensionMismatch {
                what: "code columns vs patch count",
                expected: batch.num_patches(),
                got: codes.num_patches(),
            });
        }

        let k = dictionary.num_atoms();
        let (mut b, mut c) = self.accumulators(batch, codes);
        let c_min = self.config.c_min;
        let dead: Vec<usize> = (0..k).filter(|&j| c[[j, j]] < c_min).collect();

        let mut report = UpdateReport::default();
        if !dead.is_empty() {
            if self.config.resample {
                let (reseeded, kept) = self.reseed(dictionary, codes, batch, &dead);
                for &j in &reseeded {
                    b.column_mut(j).fill(0.0);
                    c.row_mut(j).fill(0.0);
                    c.column_mut(j).fill(0.0);
                }
                report.reseeded = reseeded;
                report.dead_untouched = kept;
            } else {
                report.dead_untouched = dead.clone();
            }
        }

        let active: Vec<usize> = (0..k).filter(|j| !dead.contains(j)).collect();
        let atoms = dictionary.atoms_mut();
        for pass in 1..=self.config.max_passes {
            let mut movement: Scalar = 0.0;
            for &j in &active {
                let cjj = c[[j, j]];
                let old = atoms.column(j).to_owned();
                let mut u: Array1<Scalar> = &b.column(j) - &atoms.dot(&c.column(j));
                u.scaled_add(cjj, &old);
                u /= cjj.max(c_min);
                let norm = l2_norm(u.view());
                if norm * norm < NORM_FLOOR {
                    // Nothing to fit; the old atom is at least as good.
                    continue;
                }
                u /= norm.max(1.0);
                movement = movement.max(l2_distance(u.view(), old.view()));
                atoms.column_mut(j).assign(&u);
            }
            report.passes = pass;
            report.last_movement = movement;
            if movement < self.config.tolerance {
                report.converged = true;
                break;
            }
        }
        if active.is_empty() {
            report.converged = true;
        }

        restore_unit_norm(dictionary, codes);
        Ok(report)
    }

    /// Replaces each dead atom with the normalized residual of a patch, taking
    /// patches in decreasing residual-norm order, and zeroes its code row.
    ///
    /// Once the residuals run out a dead atom gets a random direction, but only
    /// the first time: an atom that already holds a random direction and is
    /// still unused is kept as it is. Returns `(reseeded, kept)`.
    fn reseed(
        &mut self,
        dictionary: &mut Dictionary,
        codes: &mut CodeMatrix,
        batch: &PatchBatch,
        dead: &[usize],
    ) -> (Vec<usize>, Vec<usize>) {
        let residual = batch.data() - &codes.reconstruct(dictionary);
        let norms = residual.column_norms();
        let mut ranking: Vec<usize> = (0..norms.len())
            .filter(|&i| norms[i] * norms[i] >= NORM_FLOOR)
            .collect();
        ranking.sort_by(|&p, &q| norms[q].total_cmp(&norms[p]));
        let mut picks = ranking.into_iter();

        let dim = dictionary.patch_dim();
        self.random_atoms.resize(dictionary.num_atoms(), false);
        let (mut reseeded, mut kept) = (Vec::new(), Vec::new());
        for &j in dead {
            let atom = match picks.next() {
                Some(i) => {
                    log::debug!("re-seeding dead atom {j} from residual of patch {i} (norm {:.4e})", norms[i]);
                    self.random_atoms[j] = false;
                    &residual.column(i) / norms[i]
                }
                None if self.random_atoms[j] => {
                    kept.push(j);
                    continue;
                }
                None => {
                    log::debug!("re-seeding dead atom {j} with a random direction; no residual left");
                    self.random_atoms[j] = true;
                    gaussian_atom(dim, &mut self.rng)
                }
            };
            dictionary.atoms_mut().column_mut(j).assign(&atom);
            codes.coefficients_mut().row_mut(j).fill(0.0);
            reseeded.push(j);
        }
        (reseeded, kept)
    }
}

/// Rescales every atom to unit norm, pushing the scale into its code row.
fn restore_unit_norm(dictionary: &mut Dictionary, codes: &mut CodeMatrix) {
    let atoms = dictionary.atoms_mut();
    let coefficients = codes.coefficients_mut();
    for (mut atom, mut row) in atoms.axis_iter_mut(Axis(1)).zip(coefficients.axis_iter_mut(Axis(0))) {
        let norm = l2_norm(atom.view());
        if norm != 1.0 && norm * norm >= NORM_FLOOR {
            atom /= norm;
            row *= norm;
        }
    }
}
