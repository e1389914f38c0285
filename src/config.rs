//! # Training Configuration
//!
//! Every knob of a training run lives in [`TrainConfig`]; nothing is global.
//! Configs can be loaded from TOML or JSON, and any field left out keeps its
//! default.

use crate::error::InputError;
use crate::matrix::Scalar;
use crate::optim::{CoordinateOrder, SolverConfig, UpdaterConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] InputError),
}

/// Hyperparameters of one dictionary-learning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Sparsity weight λ.
    pub lambda: Scalar,
    /// Outer-iteration ceiling.
    pub max_outer_iters: usize,
    /// Coordinate-descent pass budget per patch and outer iteration.
    pub max_code_passes: usize,
    /// Atom-sweep budget per outer iteration.
    pub max_dict_passes: usize,
    pub eps_code: Scalar,
    pub eps_dict: Scalar,
    /// Relative objective-change threshold of the stopping test.
    pub eps_obj: Scalar,
    /// Usage floor below which an atom counts as dead.
    pub c_min: Scalar,
    pub dead_atom_resample: bool,
    /// Start each sparse-coding step from the previous iteration's codes.
    pub warm_start: bool,
    pub coordinate_order: CoordinateOrder,
    pub parallel: bool,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            lambda: 0.1,
            max_outer_iters: 150,
            max_code_passes: 10,
            max_dict_passes: 10,
            eps_code: 1e-6,
            eps_dict: 1e-6,
            eps_obj: 1e-6,
            c_min: 1e-8,
            dead_atom_resample: true,
            warm_start: true,
            coordinate_order: CoordinateOrder::Cyclic,
            parallel: true,
            seed: 0,
        }
    }
}

impl TrainConfig {
    /// Loads a config file; `.json` is parsed as JSON, anything else as TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = if path.extension().map_or(false, |ext| ext == "json") {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TrainConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: TrainConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if self.max_outer_iters == 0 {
            return Err(InputError::InvalidConfig("max_outer_iters must be at least 1".into()));
        }
        if self.max_dict_passes == 0 {
            return Err(InputError::InvalidConfig("max_dict_passes must be at least 1".into()));
        }
        for (name, value) in [("eps_dict", self.eps_dict), ("eps_obj", self.eps_obj)] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(InputError::InvalidConfig(format!(
                    "{name} must be a non-negative finite number, got {value}"
                )));
            }
        }
        if !(self.c_min > 0.0 && self.c_min.is_finite()) {
            return Err(InputError::InvalidConfig(format!(
                "c_min must be a positive finite number, got {}",
                self.c_min
            )));
        }
        self.solver_config().validate()
    }

    /// Sparse-coding settings for the inner solver.
    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            lambda: self.lambda,
            max_passes: self.max_code_passes,
            tolerance: self.eps_code,
            order: self.coordinate_order,
            parallel: self.parallel,
            seed: self.seed,
        }
    }

    /// Atom-sweep settings for the dictionary updater.
    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            max_passes: self.max_dict_passes,
            tolerance: self.eps_dict,
            c_min: self.c_min,
            resample: self.dead_atom_resample,
            parallel: self.parallel,
            seed: self.seed,
        }
    }
}
