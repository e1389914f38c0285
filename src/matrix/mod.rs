//! # Matrix Module
//!
//! Numeric building blocks for the learner: the scalar type, the dense-matrix
//! capability trait the algorithms are written against, and the three data
//! holders (`PatchBatch`, `Dictionary`, `CodeMatrix`).

use ndarray::{Array1, Array2};

// --- Submodules ---
pub mod ops;
pub mod storage;

// --- Re-exports ---
pub use ops::soft_threshold;
pub use storage::{CodeMatrix, Dictionary, DictionaryInit, PatchBatch};

/// Element type of every matrix in the crate.
pub type Scalar = f64;

/// Squared norms below this are treated as zero (zero patches, collapsed atoms).
pub const NORM_FLOOR: Scalar = 1e-12;

// --- Capability Trait ---

/// The dense linear-algebra operations the learner needs.
///
/// The objective, the Gram matrix and the dictionary accumulators are written
/// purely in terms of this trait, so another backend only has to provide these
/// five operations. The crate ships an implementation for `ndarray`.
pub trait MatrixOps {
    /// Matrix product `self · rhs`.
    fn multiply(&self, rhs: &Array2<Scalar>) -> Array2<Scalar>;

    /// Owned transpose.
    fn transposed(&self) -> Array2<Scalar>;

    /// Frobenius norm.
    fn frobenius_norm(&self) -> Scalar;

    /// L2 norm of every column.
    fn column_norms(&self) -> Array1<Scalar>;

    /// Element-wise soft-thresholding by `lambda`.
    fn soft_threshold(&self, lambda: Scalar) -> Array2<Scalar>;
}
