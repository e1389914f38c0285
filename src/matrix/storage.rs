//! # Matrix Storage
//!
//! The three matrices the learner passes around. Each wraps an owned
//! `ndarray::Array2` and guards its invariants at construction:
//!
//! * [`PatchBatch`]: `d × n`, one patch per column, finite, never mutated.
//! * [`Dictionary`]: `d × k`, one unit-norm atom per column.
//! * [`CodeMatrix`]: `k × n`, one coefficient column per patch.

use super::ops::l2_norm;
use super::{MatrixOps, Scalar, NORM_FLOOR};
use crate::error::InputError;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returns the position of the first NaN/Inf entry, if any.
fn check_finite(data: &Array2<Scalar>) -> Result<(), InputError> {
    match data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), _)) => Err(InputError::NonFinite { row, col }),
        None => Ok(()),
    }
}

fn check_nonempty(len: usize, what: &'static str) -> Result<(), InputError> {
    if len == 0 {
        Err(InputError::EmptyDimension { what })
    } else {
        Ok(())
    }
}

// --- Patch Batch ---

/// Immutable `d × n` batch of flattened patches.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchBatch {
    data: Array2<Scalar>,
}

impl PatchBatch {
    /// Wraps a `d × n` matrix, rejecting empty dimensions and non-finite entries.
    pub fn new(data: Array2<Scalar>) -> Result<Self, InputError> {
        check_nonempty(data.nrows(), "patch dimension")?;
        check_nonempty(data.ncols(), "patch count")?;
        check_finite(&data)?;
        Ok(PatchBatch { data })
    }

    /// Builds a batch from individual patches; each becomes one column.
    pub fn from_patches(patches: &[Vec<Scalar>]) -> Result<Self, InputError> {
        let first = patches.first().ok_or(InputError::EmptyDimension { what: "patch count" })?;
        let dim = first.len();
        let mut data = Array2::zeros((dim, patches.len()));
        for (i, patch) in patches.iter().enumerate() {
            if patch.len() != dim {
                return Err(InputError::DimensionMismatch {
                    what: "patch length",
                    expected: dim,
                    got: patch.len(),
                });
            }
            data.column_mut(i).assign(&ArrayView1::from(patch.as_slice()));
        }
        Self::new(data)
    }

    pub fn patch_dim(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_patches(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<Scalar> {
        &self.data
    }

    pub fn patch(&self, index: usize) -> ArrayView1<'_, Scalar> {
        self.data.column(index)
    }

    pub fn into_inner(self) -> Array2<Scalar> {
        self.data
    }
}

// --- Dictionary ---

/// How the initial dictionary is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryInit {
    /// Normalized standard-normal columns.
    #[default]
    Gaussian,
    /// Normalized copies of randomly chosen non-zero patches.
    Patches,
}

impl FromStr for DictionaryInit {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian" => Ok(DictionaryInit::Gaussian),
            "patches" => Ok(DictionaryInit::Patches),
            other => Err(InputError::InvalidConfig(format!(
                "unknown dictionary init '{other}' (expected 'gaussian' or 'patches')"
            ))),
        }
    }
}

impl fmt::Display for DictionaryInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictionaryInit::Gaussian => write!(f, "gaussian"),
            DictionaryInit::Patches => write!(f, "patches"),
        }
    }
}

/// `d × k` matrix of atoms. Every column has unit L2 norm whenever a caller
/// (or the sparse-code solver) can observe it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    atoms: Array2<Scalar>,
}

impl Dictionary {
    /// `k` normalized standard-normal atoms of dimension `d`, reproducible from `seed`.
    pub fn random(patch_dim: usize, num_atoms: usize, seed: u64) -> Result<Self, InputError> {
        check_nonempty(patch_dim, "patch dimension")?;
        check_nonempty(num_atoms, "atom count")?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut atoms = Array2::zeros((patch_dim, num_atoms));
        for mut column in atoms.axis_iter_mut(Axis(1)) {
            column.assign(&gaussian_atom(patch_dim, &mut rng));
        }
        Ok(Dictionary { atoms })
    }

    /// Atoms copied from randomly chosen non-zero patches of `batch`.
    ///
    /// Patches are drawn without replacement while enough non-zero patches
    /// remain; past that point the remaining atoms are Gaussian.
    pub fn from_patches(batch: &PatchBatch, num_atoms: usize, seed: u64) -> Result<Self, InputError> {
        check_nonempty(num_atoms, "atom count")?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut candidates: Vec<usize> = (0..batch.num_patches())
            .filter(|&i| l2_norm(batch.patch(i)) > NORM_FLOOR.sqrt())
            .collect();

        let dim = batch.patch_dim();
        let mut atoms = Array2::zeros((dim, num_atoms));
        for mut column in atoms.axis_iter_mut(Axis(1)) {
            if candidates.is_empty() {
                column.assign(&gaussian_atom(dim, &mut rng));
                continue;
            }
            let pick = candidates.swap_remove(rng.gen_range(0..candidates.len()));
            let patch = batch.patch(pick);
            column.assign(&(&patch / l2_norm(patch)));
        }
        Ok(Dictionary { atoms })
    }

    /// Initial dictionary for `batch` according to `init`.
    pub fn initialize(
        init: DictionaryInit,
        batch: &PatchBatch,
        num_atoms: usize,
        seed: u64,
    ) -> Result<Self, InputError> {
        match init {
            DictionaryInit::Gaussian => Self::random(batch.patch_dim(), num_atoms, seed),
            DictionaryInit::Patches => Self::from_patches(batch, num_atoms, seed),
        }
    }

    /// Wraps caller-supplied atoms, normalizing every column.
    pub fn from_atoms(mut atoms: Array2<Scalar>) -> Result<Self, InputError> {
        check_nonempty(atoms.nrows(), "patch dimension")?;
        check_nonempty(atoms.ncols(), "atom count")?;
        check_finite(&atoms)?;
        for (j, mut column) in atoms.axis_iter_mut(Axis(1)).enumerate() {
            let norm = l2_norm(column.view());
            if norm * norm < NORM_FLOOR {
                return Err(InputError::ZeroAtom(j));
            }
            column /= norm;
        }
        Ok(Dictionary { atoms })
    }

    pub fn patch_dim(&self) -> usize {
        self.atoms.nrows()
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.ncols()
    }

    pub fn atoms(&self) -> &Array2<Scalar> {
        &self.atoms
    }

    pub fn atom(&self, index: usize) -> ArrayView1<'_, Scalar> {
        self.atoms.column(index)
    }

    pub fn into_inner(self) -> Array2<Scalar> {
        self.atoms
    }

    /// Largest `|‖d_j‖ − 1|` over all atoms.
    pub fn max_norm_deviation(&self) -> Scalar {
        self.atoms
            .column_norms()
            .iter()
            .map(|n| (n - 1.0).abs())
            .fold(0.0, Scalar::max)
    }

    /// Direct access for the updater, which restores the norm invariant itself.
    pub(crate) fn atoms_mut(&mut self) -> &mut Array2<Scalar> {
        &mut self.atoms
    }

    /// Fails unless the atoms have the same dimension as the patches.
    pub fn check_compatible(&self, batch: &PatchBatch) -> Result<(), InputError> {
        if self.patch_dim() != batch.patch_dim() {
            return Err(InputError::DimensionMismatch {
                what: "atom length vs patch length",
                expected: batch.patch_dim(),
                got: self.patch_dim(),
            });
        }
        Ok(())
    }
}

/// One unit-norm standard-normal vector.
pub(crate) fn gaussian_atom(dim: usize, rng: &mut StdRng) -> Array1<Scalar> {
    loop {
        let v: Array1<Scalar> = (0..dim).map(|_| rng.sample::<Scalar, _>(StandardNormal)).collect();
        let norm = l2_norm(v.view());
        if norm * norm >= NORM_FLOOR {
            return v / norm;
        }
    }
}

// --- Code Matrix ---

/// `k × n` sparse coefficients, one column per patch.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeMatrix {
    coefficients: Array2<Scalar>,
}

impl CodeMatrix {
    pub fn zeros(num_atoms: usize, num_patches: usize) -> Self {
        CodeMatrix {
            coefficients: Array2::zeros((num_atoms, num_patches)),
        }
    }

    /// Wraps externally produced coefficients (e.g. loaded from disk).
    pub fn from_coefficients(coefficients: Array2<Scalar>) -> Result<Self, InputError> {
        check_nonempty(coefficients.nrows(), "atom count")?;
        check_nonempty(coefficients.ncols(), "patch count")?;
        check_finite(&coefficients)?;
        Ok(CodeMatrix { coefficients })
    }

    pub(crate) fn from_raw(coefficients: Array2<Scalar>) -> Self {
        CodeMatrix { coefficients }
    }

    pub fn num_atoms(&self) -> usize {
        self.coefficients.nrows()
    }

    pub fn num_patches(&self) -> usize {
        self.coefficients.ncols()
    }

    pub fn coefficients(&self) -> &Array2<Scalar> {
        &self.coefficients
    }

    pub(crate) fn coefficients_mut(&mut self) -> &mut Array2<Scalar> {
        &mut self.coefficients
    }

    pub fn code(&self, patch: usize) -> ArrayView1<'_, Scalar> {
        self.coefficients.column(patch)
    }

    pub fn into_inner(self) -> Array2<Scalar> {
        self.coefficients
    }

    /// Number of non-zero coefficients.
    pub fn nnz(&self) -> usize {
        self.coefficients.iter().filter(|v| **v != 0.0).count()
    }

    /// Fraction of coefficients that are exactly zero.
    pub fn sparsity(&self) -> Scalar {
        let total = self.coefficients.len();
        if total == 0 {
            return 1.0;
        }
        (total - self.nnz()) as Scalar / total as Scalar
    }

    /// `‖A‖₁`, the sum of absolute coefficients.
    pub fn l1_norm(&self) -> Scalar {
        self.coefficients.iter().map(|v| v.abs()).sum()
    }

    /// Reconstruction `D · A`.
    pub fn reconstruct(&self, dictionary: &Dictionary) -> Array2<Scalar> {
        dictionary.atoms().multiply(&self.coefficients)
    }
}
