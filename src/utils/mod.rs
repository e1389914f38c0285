//! # Utility Functions (`utils`)
//!
//! Collaborators around the learning engine: parallel helpers, patch
//! sampling, persistence, grid visualization and metrics logging.

pub mod logging;
pub mod parallel;
pub mod patches;
pub mod serialization;
pub mod visualize;

pub use logging::MetricsLogger;
pub use serialization::{load_patches, load_state, save_state, SerializationError, TrainingState};
