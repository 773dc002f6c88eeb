//! Dataset-to-registry retraining.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ml::metrics::EvalMetrics;
use crate::ml::mlp::{EpochStats, TrainOptions};

mod pipeline;
mod split;

pub use pipeline::TrainingPipeline;
pub use split::{Split, train_test_split};

/// Options for one retrain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    #[serde(flatten)]
    pub network: TrainOptions,
    /// Fraction of records held out for evaluation, in `(0, 1)`.
    pub test_fraction: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            network: TrainOptions::default(),
            test_fraction: 0.2,
        }
    }
}

/// Whether a retrain hands its held-out accuracy back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainMode {
    Silent,
    Reporting,
}

/// Where a pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingStage {
    Idle,
    Loading,
    FittingVocabulary,
    Splitting,
    Training,
    Evaluating,
    Persisting,
    /// Last run swapped in a new model.
    Published,
    /// Last run stopped early; the previous model is still live.
    Failed,
}

impl TrainingStage {
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Idle | Self::Published | Self::Failed)
    }
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Loading => "loading dataset",
            Self::FittingVocabulary => "fitting vocabulary",
            Self::Splitting => "splitting",
            Self::Training => "training",
            Self::Evaluating => "evaluating",
            Self::Persisting => "persisting",
            Self::Published => "published",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub entry_id: Uuid,
    pub metrics: EvalMetrics,
    pub examples: usize,
    pub train_examples: usize,
    pub holdout_examples: usize,
    pub vocabulary_size: usize,
    pub history: Vec<EpochStats>,
    pub elapsed: Duration,
}
