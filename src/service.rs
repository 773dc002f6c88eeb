//! The core as collaborators see it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, Settings};
use crate::dataset::{DatasetError, DatasetStore, Label};
use crate::error::{ClassifyError, RetrainError};
use crate::inference::{SpamClassifier, SpamFilter};
use crate::registry::{ModelRegistry, PersistenceError, RegistryEntry, RegistryError};
use crate::training::{RetrainMode, TrainingPipeline, TrainingStage};
use crate::worker::{RetrainTicket, RetrainWorker};

/// Failures while wiring the core together.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("Failed to start retrain worker: {0}")]
    SpawnWorker(#[source] std::io::Error),
}

/// Point-in-time view for operators.
#[derive(Debug, Clone)]
pub struct ShieldStatus {
    pub dataset_path: PathBuf,
    pub model_dir: PathBuf,
    pub stage: TrainingStage,
    pub current: Option<Arc<RegistryEntry>>,
}

/// Dataset, registry, pipeline and classifier behind one handle.
pub struct SpamShield {
    store: Arc<DatasetStore>,
    registry: Arc<ModelRegistry>,
    pipeline: Arc<TrainingPipeline>,
    classifier: SpamClassifier,
    worker: RetrainWorker,
    retrain_on_start: bool,
}

impl SpamShield {
    /// Open using the dataset and model locations resolved from `settings`.
    pub fn open(settings: &Settings) -> Result<Self, OpenError> {
        let dataset_path = settings.resolved_dataset_path()?;
        let model_dir = settings.resolved_model_dir()?;
        Self::with_paths(dataset_path, model_dir, settings)
    }

    pub fn with_paths(
        dataset_path: impl Into<PathBuf>,
        model_dir: impl Into<PathBuf>,
        settings: &Settings,
    ) -> Result<Self, OpenError> {
        let store = Arc::new(DatasetStore::new(dataset_path));
        let registry = Arc::new(ModelRegistry::open(
            model_dir,
            settings.registry.retain_generations,
        )?);
        let pipeline = Arc::new(TrainingPipeline::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            settings.training.clone(),
        ));
        let worker = RetrainWorker::spawn(Arc::clone(&pipeline)).map_err(OpenError::SpawnWorker)?;
        tracing::debug!(
            dataset = %store.path().display(),
            models = %registry.dir().display(),
            "Opened spam shield"
        );
        Ok(Self {
            classifier: SpamClassifier::new(Arc::clone(&registry)),
            store,
            registry,
            pipeline,
            worker,
            retrain_on_start: settings.retrain_on_start,
        })
    }

    /// Make a model available: retrain silently when configured to, otherwise
    /// load the published entry and only train if there is none.
    pub fn startup(&self) -> Result<(), RetrainError> {
        if self.retrain_on_start {
            return self.pipeline.retrain(RetrainMode::Silent).map(|_| ());
        }
        match self.registry.current() {
            Ok(entry) => {
                tracing::info!(entry_id = %entry.id, "Serving published model");
                Ok(())
            }
            Err(RegistryError::NoModel { .. }) => {
                tracing::info!("No published model; training one");
                self.pipeline.retrain(RetrainMode::Silent).map(|_| ())
            }
            Err(err) => {
                tracing::warn!("Published model is unusable ({err}); retraining");
                self.pipeline.retrain(RetrainMode::Silent).map(|_| ())
            }
        }
    }

    pub fn classify(&self, text: &str) -> Result<bool, ClassifyError> {
        self.classifier.classify(text)
    }

    pub fn spam_probability(&self, text: &str) -> Result<f32, ClassifyError> {
        self.classifier.spam_probability(text)
    }

    /// Retrain on the calling thread; `report` asks for held-out accuracy.
    pub fn retrain(&self, report: bool) -> Result<Option<f32>, RetrainError> {
        let mode = if report {
            RetrainMode::Reporting
        } else {
            RetrainMode::Silent
        };
        self.pipeline.retrain(mode)
    }

    pub fn append_example(&self, label: Label, text: &str) -> Result<(), DatasetError> {
        self.store.append_text(label, text).map(|_| ())
    }

    /// Record a labeled example and queue a reporting retrain for it.
    pub fn add_example(&self, label: Label, text: &str) -> Result<RetrainTicket, DatasetError> {
        self.append_example(label, text)?;
        Ok(self.worker.submit(RetrainMode::Reporting))
    }

    /// Correct a false positive by teaching the model that `text` is ham.
    pub fn mark_not_spam(&self, text: &str) -> Result<RetrainTicket, DatasetError> {
        tracing::info!("Message reported as not spam");
        self.add_example(Label::Ham, text)
    }

    /// Queue a retrain without touching the dataset.
    pub fn schedule_retrain(&self, mode: RetrainMode) -> RetrainTicket {
        self.worker.submit(mode)
    }

    pub fn reload(&self) -> Result<(), ClassifyError> {
        self.classifier.reload()
    }

    pub fn status(&self) -> Result<ShieldStatus, ClassifyError> {
        let current = match self.registry.current() {
            Ok(entry) => Some(entry),
            Err(RegistryError::NoModel { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        Ok(ShieldStatus {
            dataset_path: self.store.path().to_path_buf(),
            model_dir: self.registry.dir().to_path_buf(),
            stage: self.pipeline.stage(),
            current,
        })
    }

    pub fn classifier(&self) -> &SpamClassifier {
        &self.classifier
    }

    pub fn dataset_path(&self) -> &Path {
        self.store.path()
    }

    pub fn model_dir(&self) -> &Path {
        self.registry.dir()
    }
}

impl SpamFilter for SpamShield {
    fn is_spam(&self, text: &str) -> Result<bool, ClassifyError> {
        self.classify(text)
    }
}
