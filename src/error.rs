//! Errors surfaced to callers of the core through [`crate::SpamShield`].

use std::path::PathBuf;

use thiserror::Error;

use crate::dataset::DatasetError;
use crate::features::FeatureError;
use crate::ml::mlp::TrainingError;
use crate::registry::{PersistenceError, RegistryError};

/// Why a retrain did not publish a new model. The previous model stays live in every case.
#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
    #[error("Training error: {0}")]
    Training(#[from] TrainingError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Why a message could not be scored.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("No trained model is available in {dir}")]
    NoModel { dir: PathBuf },
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Model version mismatch: {reason}")]
    VersionMismatch { reason: String },
}

impl From<RegistryError> for ClassifyError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NoModel { dir } => Self::NoModel { dir },
            RegistryError::Persistence(err) => Self::Persistence(err),
            RegistryError::VersionMismatch { reason } => Self::VersionMismatch { reason },
        }
    }
}
