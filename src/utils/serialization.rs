//! # State Serialization Utilities
//!
//! Saving and loading dictionaries, codes and patch batches. A file holds a
//! state dict: a `BTreeMap` from a fixed key (`"dictionary"`, `"codes"`,
//! `"patches"`) to a flat `{shape, data}` record, encoded with `bincode`.
//! Loading rebuilds the typed values, so every invariant is checked again.

use crate::error::InputError;
use crate::matrix::{CodeMatrix, Dictionary, PatchBatch, Scalar};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub const DICTIONARY_KEY: &str = "dictionary";
pub const CODES_KEY: &str = "codes";
pub const PATCHES_KEY: &str = "patches";

// --- Error Type ---
#[derive(thiserror::Error, Debug)]
pub enum SerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization Error (Bincode): {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Matrix '{key}' has shape {shape:?} but {len} values")]
    ShapeMismatch {
        key: String,
        shape: [usize; 2],
        len: usize,
    },
    #[error("Key '{0}' not found in state file")]
    MissingKey(String),
    #[error("Matrix '{key}' is invalid: {source}")]
    Invalid {
        key: String,
        #[source]
        source: InputError,
    },
}

// --- Serializable Matrix Wrapper ---

/// Row-major flat copy of a matrix.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct SerializableMatrix {
    shape: [usize; 2],
    data: Vec<Scalar>,
}

impl SerializableMatrix {
    fn from_array(array: &Array2<Scalar>) -> Self {
        SerializableMatrix {
            shape: [array.nrows(), array.ncols()],
            // `iter()` walks in logical row-major order whatever the memory layout.
            data: array.iter().copied().collect(),
        }
    }

    fn into_array(self, key: &str) -> Result<Array2<Scalar>, SerializationError> {
        let [rows, cols] = self.shape;
        let len = self.data.len();
        Array2::from_shape_vec((rows, cols), self.data).map_err(|_| SerializationError::ShapeMismatch {
            key: key.to_string(),
            shape: self.shape,
            len,
        })
    }
}

type StateDict = BTreeMap<String, SerializableMatrix>;

/// The matrices a run can persist. Absent entries are simply not written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingState {
    pub dictionary: Option<Dictionary>,
    pub codes: Option<CodeMatrix>,
    pub patches: Option<PatchBatch>,
}

fn invalid(key: &str) -> impl FnOnce(InputError) -> SerializationError + '_ {
    move |source| SerializationError::Invalid {
        key: key.to_string(),
        source,
    }
}

// --- Save Function ---

/// Writes every present matrix of `state` to `path`.
pub fn save_state<P: AsRef<Path>>(path: P, state: &TrainingState) -> Result<(), SerializationError> {
    let mut state_dict: StateDict = BTreeMap::new();
    if let Some(dictionary) = &state.dictionary {
        state_dict.insert(DICTIONARY_KEY.into(), SerializableMatrix::from_array(dictionary.atoms()));
    }
    if let Some(codes) = &state.codes {
        state_dict.insert(CODES_KEY.into(), SerializableMatrix::from_array(codes.coefficients()));
    }
    if let Some(patches) = &state.patches {
        state_dict.insert(PATCHES_KEY.into(), SerializableMatrix::from_array(patches.data()));
    }

    let file = File::create(path.as_ref())?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &state_dict)?;
    log::debug!("saved {:?} to {}", state_dict.keys().collect::<Vec<_>>(), path.as_ref().display());
    Ok(())
}

// --- Load Function ---

/// Reads a state file written by [`save_state`]. Unknown keys are skipped with
/// a warning.
pub fn load_state<P: AsRef<Path>>(path: P) -> Result<TrainingState, SerializationError> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let state_dict: StateDict = bincode::deserialize_from(reader)?;

    let mut state = TrainingState::default();
    for (key, matrix) in state_dict {
        match key.as_str() {
            DICTIONARY_KEY => {
                let atoms = matrix.into_array(&key)?;
                state.dictionary = Some(Dictionary::from_atoms(atoms).map_err(invalid(&key))?);
            }
            CODES_KEY => {
                let coefficients = matrix.into_array(&key)?;
                state.codes = Some(CodeMatrix::from_coefficients(coefficients).map_err(invalid(&key))?);
            }
            PATCHES_KEY => {
                let data = matrix.into_array(&key)?;
                state.patches = Some(PatchBatch::new(data).map_err(invalid(&key))?);
            }
            other => log::warn!("Key '{}' found in state file but not recognised. Skipping.", other),
        }
    }
    Ok(state)
}

/// Loads only the patch batch of a state file; fails if it holds none.
pub fn load_patches<P: AsRef<Path>>(path: P) -> Result<PatchBatch, SerializationError> {
    load_state(path)?
        .patches
        .ok_or_else(|| SerializationError::MissingKey(PATCHES_KEY.to_string()))
}
