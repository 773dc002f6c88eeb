//! Scoring messages against the published model.

use std::sync::Arc;

use crate::error::ClassifyError;
use crate::ml::mlp::is_spam_probability;
use crate::registry::{ModelRegistry, RegistryEntry};

/// Anything that can decide whether a message is spam.
pub trait SpamFilter: Send + Sync {
    fn is_spam(&self, text: &str) -> Result<bool, ClassifyError>;
}

/// [`SpamFilter`] backed by the registry's active entry.
#[derive(Debug, Clone)]
pub struct SpamClassifier {
    registry: Arc<ModelRegistry>,
}

impl SpamClassifier {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// `true` when the spam probability is at least 0.5.
    pub fn classify(&self, text: &str) -> Result<bool, ClassifyError> {
        self.spam_probability(text).map(is_spam_probability)
    }

    pub fn spam_probability(&self, text: &str) -> Result<f32, ClassifyError> {
        let entry = self.registry.current()?;
        score(&entry, text)
    }

    /// Re-read the published entry from disk.
    pub fn reload(&self) -> Result<(), ClassifyError> {
        match self.registry.reload()? {
            Some(entry) => {
                tracing::info!(entry_id = %entry.id, "Reloaded model");
                Ok(())
            }
            None => Err(ClassifyError::NoModel {
                dir: self.registry.dir().to_path_buf(),
            }),
        }
    }
}

impl SpamFilter for SpamClassifier {
    fn is_spam(&self, text: &str) -> Result<bool, ClassifyError> {
        self.classify(text)
    }
}

fn score(entry: &RegistryEntry, text: &str) -> Result<f32, ClassifyError> {
    let features = entry.vocabulary.transform(text);
    entry
        .model
        .predict_proba(&features)
        .ok_or_else(|| ClassifyError::VersionMismatch {
            reason: format!(
                "model expects {} features, vocabulary produced {}",
                entry.model.input_dim, features.dim
            ),
        })
}
