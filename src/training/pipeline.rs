use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::split::train_test_split;
use super::{PipelineOptions, RetrainMode, TrainingReport, TrainingStage};
use crate::dataset::{DatasetStore, Label, LabeledExample};
use crate::error::RetrainError;
use crate::features::{SparseVector, Vocabulary};
use crate::ml::mlp::{TrainDataset, TrainingError, evaluate, train_spam_net};
use crate::registry::{ModelRegistry, RegistryEntry};

/// Minimum records needed to form both a training and a held-out partition.
const MIN_EXAMPLES: usize = 2;

/// Rebuilds the vocabulary and network from the dataset and publishes them as one entry.
///
/// Nothing reaches the registry unless every stage succeeds.
#[derive(Debug)]
pub struct TrainingPipeline {
    store: Arc<DatasetStore>,
    registry: Arc<ModelRegistry>,
    options: PipelineOptions,
    stage: Mutex<TrainingStage>,
    run_lock: Mutex<()>,
}

impl TrainingPipeline {
    pub fn new(store: Arc<DatasetStore>, registry: Arc<ModelRegistry>, options: PipelineOptions) -> Self {
        Self {
            store,
            registry,
            options,
            stage: Mutex::new(TrainingStage::Idle),
            run_lock: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn stage(&self) -> TrainingStage {
        *self.stage.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Run the pipeline, returning held-out accuracy only for [`RetrainMode::Reporting`].
    pub fn retrain(&self, mode: RetrainMode) -> Result<Option<f32>, RetrainError> {
        let report = self.run()?;
        Ok(match mode {
            RetrainMode::Silent => None,
            RetrainMode::Reporting => Some(report.metrics.accuracy),
        })
    }

    /// Run every stage once. Concurrent callers are serialized.
    pub fn run(&self) -> Result<TrainingReport, RetrainError> {
        let _run = self.run_lock.lock().unwrap_or_else(|err| err.into_inner());
        let started = Instant::now();
        match self.run_stages(started) {
            Ok(report) => {
                self.enter(TrainingStage::Published);
                tracing::info!(
                    entry_id = %report.entry_id,
                    examples = report.examples,
                    terms = report.vocabulary_size,
                    accuracy = report.metrics.accuracy,
                    loss = report.metrics.loss,
                    "Retrain finished in {:.2?}",
                    report.elapsed
                );
                Ok(report)
            }
            Err(err) => {
                let failed_at = self.stage();
                self.enter(TrainingStage::Failed);
                tracing::warn!("Retrain failed while {failed_at}: {err}");
                Err(err)
            }
        }
    }

    fn run_stages(&self, started: Instant) -> Result<TrainingReport, RetrainError> {
        self.enter(TrainingStage::Loading);
        let examples = self.store.load_all()?;

        self.enter(TrainingStage::FittingVocabulary);
        let texts: Vec<&str> = examples.iter().map(|example| example.text.as_str()).collect();
        let vocabulary = Vocabulary::fit(&texts)?;
        let rows: Vec<SparseVector> = texts.iter().map(|text| vocabulary.transform(text)).collect();

        self.enter(TrainingStage::Splitting);
        check_trainable(&examples)?;
        let split = train_test_split(examples.len(), self.options.test_fraction, self.options.network.seed);
        let train = gather(&rows, &examples, &split.train);
        let holdout = gather(&rows, &examples, &split.holdout);

        self.enter(TrainingStage::Training);
        let trained = train_spam_net(&train, &self.options.network, Some(&holdout))?;

        self.enter(TrainingStage::Evaluating);
        let metrics = evaluate(&trained.net, &holdout);

        self.enter(TrainingStage::Persisting);
        let vocabulary_size = vocabulary.len();
        let entry = self
            .registry
            .publish(RegistryEntry::new(vocabulary, trained.net, metrics, examples.len()))?;

        Ok(TrainingReport {
            entry_id: entry.id,
            metrics,
            examples: examples.len(),
            train_examples: train.len(),
            holdout_examples: holdout.len(),
            vocabulary_size,
            history: trained.history,
            elapsed: started.elapsed(),
        })
    }

    fn enter(&self, stage: TrainingStage) {
        *self.stage.lock().unwrap_or_else(|err| err.into_inner()) = stage;
        if stage.is_running() {
            tracing::debug!("Retrain stage: {stage}");
        }
    }
}

fn check_trainable(examples: &[LabeledExample]) -> Result<(), TrainingError> {
    if examples.len() < MIN_EXAMPLES {
        return Err(TrainingError::TooFewExamples {
            required: MIN_EXAMPLES,
            found: examples.len(),
        });
    }
    for label in [Label::Ham, Label::Spam] {
        if !examples.iter().any(|example| example.label == label) {
            return Err(TrainingError::MissingClass {
                label: label.as_str(),
            });
        }
    }
    Ok(())
}

fn gather(rows: &[SparseVector], examples: &[LabeledExample], indices: &[usize]) -> TrainDataset {
    TrainDataset {
        x: indices.iter().map(|&i| rows[i].clone()).collect(),
        y: indices.iter().map(|&i| examples[i].label.target()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use std::path::Path;
    use tempfile::tempdir;

    const DATASET: &str = "\
ham hello how are you
spam buy cheap pills now
ham see you at lunch
spam win money now click
";

    fn quick_options() -> PipelineOptions {
        let mut options = PipelineOptions::default();
        options.network.hidden1 = 8;
        options.network.hidden2 = 4;
        options.network.epochs = 5;
        options
    }

    fn pipeline(dir: &Path, dataset: &str) -> TrainingPipeline {
        let path = dir.join("dataset.txt");
        std::fs::write(&path, dataset).unwrap();
        let registry = ModelRegistry::open(dir.join("models"), 2).unwrap();
        TrainingPipeline::new(
            Arc::new(DatasetStore::new(path)),
            Arc::new(registry),
            quick_options(),
        )
    }

    #[test]
    fn successful_run_publishes_a_consistent_entry() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), DATASET);
        assert_eq!(pipeline.stage(), TrainingStage::Idle);

        let report = pipeline.run().unwrap();
        assert_eq!(pipeline.stage(), TrainingStage::Published);
        assert_eq!(report.examples, 4);
        assert_eq!((report.train_examples, report.holdout_examples), (3, 1));
        assert_eq!(report.vocabulary_size, 14);
        assert_eq!(report.history.len(), 5);

        let entry = pipeline.registry.current().unwrap();
        assert_eq!(entry.id, report.entry_id);
        assert_eq!(entry.model.input_dim, entry.vocabulary.len());
        assert_eq!(entry.examples, 4);
    }

    #[test]
    fn retrain_mode_controls_reported_accuracy() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), DATASET);
        assert_eq!(pipeline.retrain(RetrainMode::Silent).unwrap(), None);
        let accuracy = pipeline.retrain(RetrainMode::Reporting).unwrap().unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn single_class_dataset_fails_without_publishing() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), "ham hello there\nham see you soon\n");
        let err = pipeline.run().unwrap_err();
        assert!(matches!(
            err,
            RetrainError::Training(TrainingError::MissingClass { label: "spam" })
        ));
        assert_eq!(pipeline.stage(), TrainingStage::Failed);
        assert!(matches!(
            pipeline.registry.current(),
            Err(RegistryError::NoModel { .. })
        ));
    }

    #[test]
    fn single_record_is_too_few() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), "spam buy now\n");
        assert!(matches!(
            pipeline.run(),
            Err(RetrainError::Training(TrainingError::TooFewExamples { found: 1, .. }))
        ));
    }

    #[test]
    fn malformed_dataset_is_a_dataset_error() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), "ham hello\nnonsense line\nspam buy now\n");
        assert!(matches!(pipeline.run(), Err(RetrainError::Dataset(_))));
        assert_eq!(pipeline.stage(), TrainingStage::Failed);
    }
}
