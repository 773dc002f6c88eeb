//! Persistent settings stored as TOML in the app root.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;
use crate::training::PipelineOptions;

mod io;

pub use io::{CONFIG_FILE_NAME, config_path, load_from, load_or_default, save, save_to_path};

/// Overrides [`Settings::dataset_path`] when set.
pub const DATASET_PATH_ENV_VAR: &str = "SPAMSHIELD_DATASET_PATH";

/// Errors that may occur while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to create the config directory.
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read the config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write the config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to serialize config to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    /// No usable config directory found.
    #[error("No suitable config directory found")]
    NoConfigDir,
}

impl From<app_dirs::AppDirError> for ConfigError {
    fn from(error: app_dirs::AppDirError) -> Self {
        match error {
            app_dirs::AppDirError::NoBaseDir => Self::NoConfigDir,
            app_dirs::AppDirError::CreateDir { path, source } => Self::CreateDir { path, source },
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Labeled dataset file; defaults to `dataset.txt` in the app root.
    pub dataset_path: Option<PathBuf>,
    /// Directory holding published models; defaults to `models/` in the app root.
    pub model_dir: Option<PathBuf>,
    /// Retrain from the dataset whenever the core starts.
    pub retrain_on_start: bool,
    pub training: PipelineOptions,
    pub registry: RegistrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dataset_path: None,
            model_dir: None,
            retrain_on_start: true,
            training: PipelineOptions::default(),
            registry: RegistrySettings::default(),
        }
    }
}

/// On-disk model retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Generations kept on disk, including the live one.
    pub retain_generations: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            retain_generations: 2,
        }
    }
}

impl Settings {
    /// Replace out-of-range values with defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = PipelineOptions::default();
        if !(self.training.test_fraction > 0.0 && self.training.test_fraction < 1.0) {
            tracing::warn!(
                "Ignoring test_fraction {}; using {}",
                self.training.test_fraction,
                defaults.test_fraction
            );
            self.training.test_fraction = defaults.test_fraction;
        }
        self.registry.retain_generations = self.registry.retain_generations.max(1);
        self
    }

    /// Dataset location: environment override, then settings, then the app root default.
    pub fn resolved_dataset_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(DATASET_PATH_ENV_VAR).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        match &self.dataset_path {
            Some(path) => Ok(path.clone()),
            None => Ok(app_dirs::default_dataset_path()?),
        }
    }

    pub fn resolved_model_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.model_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(app_dirs::models_dir()?),
        }
    }
}
