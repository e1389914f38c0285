//! # Optimization (`optim`)
//!
//! The alternating-minimization engine: a coordinate-descent sparse-code
//! solver, a block-coordinate dictionary updater, the stopping policy and the
//! trainer that alternates between them.
//!
//! Everything here minimizes the joint objective
//! `½‖X − D A‖²_F + λ‖A‖₁` over codes `A` and unit-norm atoms `D`.

use crate::error::InputError;
use crate::matrix::{CodeMatrix, Dictionary, MatrixOps, PatchBatch, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// --- Submodules ---
pub mod dictionary;
pub mod sparse_code;
pub mod stopping;
pub mod trainer;

// Re-exports
pub use dictionary::{DictionaryUpdater, UpdateReport, UpdaterConfig};
pub use sparse_code::{encode_with, CodeReport, SolverConfig, SparseCodeSolver};
pub use stopping::StoppingPolicy;
pub use trainer::{
    Callback, CallbackSignal, IterationRecord, StopFlag, TrainOutcome, TrainStatus, Trainer,
};

// --- Coordinate Order ---

/// Order in which the sparse-code solver visits coordinates within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateOrder {
    /// `0, 1, …, k−1` every pass.
    #[default]
    Cyclic,
    /// A fresh random permutation every pass, seeded per patch.
    Random,
    /// Always update the coordinate whose closed-form step is largest (Li & Osher).
    Greedy,
}

impl FromStr for CoordinateOrder {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cyclic" => Ok(CoordinateOrder::Cyclic),
            "random" => Ok(CoordinateOrder::Random),
            "greedy" => Ok(CoordinateOrder::Greedy),
            other => Err(InputError::InvalidConfig(format!(
                "unknown coordinate order '{other}' (expected 'cyclic', 'random' or 'greedy')"
            ))),
        }
    }
}

impl fmt::Display for CoordinateOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateOrder::Cyclic => write!(f, "cyclic"),
            CoordinateOrder::Random => write!(f, "random"),
            CoordinateOrder::Greedy => write!(f, "greedy"),
        }
    }
}

// --- Objective ---

/// The joint objective split into its two terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Objective {
    /// `½‖X − D A‖²_F`
    pub reconstruction: Scalar,
    /// `λ‖A‖₁`
    pub penalty: Scalar,
    pub total: Scalar,
}

/// Evaluates `½‖X − D A‖²_F + λ‖A‖₁`. A negative `lambda` counts as zero, the
/// same as in the solver.
pub fn objective(
    batch: &PatchBatch,
    dictionary: &Dictionary,
    codes: &CodeMatrix,
    lambda: Scalar,
) -> Objective {
    let residual = batch.data() - &codes.reconstruct(dictionary);
    let reconstruction = 0.5 * residual.frobenius_norm().powi(2);
    let penalty = lambda.max(0.0) * codes.l1_norm();
    Objective {
        reconstruction,
        penalty,
        total: reconstruction + penalty,
    }
}

/// Logs the degenerate-to-least-squares case. Not an error: the solver still
/// converges, it just stops producing sparse codes.
pub(crate) fn warn_if_unpenalized(lambda: Scalar) {
    if lambda <= 0.0 {
        log::warn!(
            "sparsity weight lambda = {lambda} is not positive; sparse coding degenerates to least squares"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn objective_terms() {
        let batch = PatchBatch::new(array![[1.0], [1.0]]).unwrap();
        let dict = Dictionary::from_atoms(array![[1.0], [0.0]]).unwrap();
        let codes = CodeMatrix::from_coefficients(array![[0.5]]).unwrap();
        let obj = objective(&batch, &dict, &codes, 0.2);
        // residual = [0.5, 1.0]
        assert_abs_diff_eq!(obj.reconstruction, 0.625);
        assert_abs_diff_eq!(obj.penalty, 0.1);
        assert_abs_diff_eq!(obj.total, 0.725);
        assert_abs_diff_eq!(objective(&batch, &dict, &codes, -1.0).penalty, 0.0);
    }

    #[test]
    fn order_round_trips_through_strings() {
        for order in [CoordinateOrder::Cyclic, CoordinateOrder::Random, CoordinateOrder::Greedy] {
            assert_eq!(order.to_string().parse::<CoordinateOrder>().unwrap(), order);
        }
    }
}
