//! # Error Types
//!
//! Fatal input validation errors for the learning engine. Everything else the
//! engine runs into (stalled inner solvers, dead atoms, hitting the iteration
//! ceiling) is recovered locally and only shows up in the diagnostics.

/// Rejected input. Returned before any computation starts.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("{what} must be at least 1, got 0")]
    EmptyDimension { what: &'static str },
    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Non-finite value at row {row}, column {col}")]
    NonFinite { row: usize, col: usize },
    #[error("Atom {0} is identically zero and cannot be normalized")]
    ZeroAtom(usize),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
