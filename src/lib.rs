//! Spam classification core: a labeled dataset, a TF-IDF vocabulary, a small
//! neural network, and a registry that swaps trained pairs in atomically.

/// Application directory resolution.
pub mod app_dirs;
/// TOML settings.
pub mod config;
/// Labeled message dataset.
pub mod dataset;
/// Errors surfaced by the core.
pub mod error;
/// Tokenization and TF-IDF features.
pub mod features;
/// Durable file writes.
pub mod fs_ops;
/// Message classification.
pub mod inference;
/// Logging setup.
pub mod logging;
/// Network, optimizer, and evaluation metrics.
pub mod ml;
/// Published model storage.
pub mod registry;
/// Collaborator-facing facade.
pub mod service;
/// Retraining pipeline.
pub mod training;
/// Background retrain worker.
pub mod worker;

pub use dataset::{DatasetError, Label, LabeledExample};
pub use error::{ClassifyError, RetrainError};
pub use inference::{SpamClassifier, SpamFilter};
pub use service::SpamShield;
pub use training::RetrainMode;
