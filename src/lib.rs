//! # sparsedict
//!
//! Learns a dictionary of unit-norm atoms that sparsely reconstructs a fixed
//! batch of image patches, by alternating coordinate-descent sparse coding with
//! block-coordinate dictionary updates.
//!
//! The three entry points are [`initialize_dictionary`], [`train`] and
//! [`encode`]. [`Trainer`] gives access to callbacks and cooperative stopping;
//! the `utils` module holds the collaborators around the engine (patch
//! sampling, persistence, grid visualization, metrics logging).

pub mod config;
pub mod error;
pub mod matrix;
pub mod optim;
pub mod utils;

pub use config::{ConfigError, TrainConfig};
pub use error::InputError;
pub use matrix::{CodeMatrix, Dictionary, DictionaryInit, MatrixOps, PatchBatch, Scalar};
pub use optim::{
    encode_with, objective, Callback, CallbackSignal, CoordinateOrder, IterationRecord, Objective,
    SolverConfig, StopFlag, TrainOutcome, TrainStatus, Trainer,
};

/// `num_atoms` normalized random Gaussian atoms of length `patch_dim`.
pub fn initialize_dictionary(patch_dim: usize, num_atoms: usize, seed: u64) -> Result<Dictionary, InputError> {
    Dictionary::random(patch_dim, num_atoms, seed)
}

/// Learns a dictionary for `patches` starting from `initial_dictionary`.
pub fn train(
    patches: &PatchBatch,
    initial_dictionary: Dictionary,
    config: &TrainConfig,
) -> Result<TrainOutcome, InputError> {
    Trainer::new(config.clone()).run(patches, initial_dictionary)
}

/// Sparse codes for `patches` under a fixed `dictionary`, with default solver
/// settings apart from `lambda`.
pub fn encode(patches: &PatchBatch, dictionary: &Dictionary, lambda: Scalar) -> Result<CodeMatrix, InputError> {
    let config = SolverConfig {
        lambda,
        ..SolverConfig::default()
    };
    encode_with(patches, dictionary, &config)
}
