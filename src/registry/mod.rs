//! Durable, atomically swapped (vocabulary, model) pairs.
//!
//! Each publish writes a fresh `gen-<entry_id>` directory holding both
//! artifacts, then flips `current.json` to point at it. Readers only ever see
//! a pair through an `Arc<RegistryEntry>`, so a half-published pair is never
//! observable.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use uuid::Uuid;

use crate::features::Vocabulary;
use crate::ml::metrics::EvalMetrics;
use crate::ml::mlp::SpamNet;

mod storage;

/// Pointer file naming the live generation.
pub const POINTER_FILE: &str = "current.json";
/// Serialized vocabulary inside a generation directory.
pub const VOCABULARY_FILE: &str = "vectorizer.json";
/// Serialized network inside a generation directory.
pub const MODEL_FILE: &str = "classifier.json";

/// Errors reading or writing model artifacts.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to create model directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Model artifact {path} is missing; its pair cannot be loaded alone")]
    MissingArtifact { path: PathBuf },
    #[error("Checksum mismatch for {path}; the file is incomplete or was modified")]
    ChecksumMismatch { path: PathBuf },
    #[error("Invalid model artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },
}

/// Errors obtaining the published entry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No model has been published in {dir}")]
    NoModel { dir: PathBuf },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("Vocabulary and model do not belong together: {reason}")]
    VersionMismatch { reason: String },
}

/// A published, mutually consistent vocabulary and model.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: Uuid,
    pub vocabulary: Vocabulary,
    pub model: SpamNet,
    /// Held-out evaluation of `model`.
    pub metrics: EvalMetrics,
    /// Number of dataset records the pair was trained on.
    pub examples: usize,
    /// Unix timestamp (UTC seconds).
    pub trained_at: i64,
}

impl RegistryEntry {
    pub fn new(vocabulary: Vocabulary, model: SpamNet, metrics: EvalMetrics, examples: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            vocabulary,
            model,
            metrics,
            examples,
            trained_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

/// Holder of the single active [`RegistryEntry`], backed by a model directory.
#[derive(Debug)]
pub struct ModelRegistry {
    dir: PathBuf,
    retain: usize,
    current: RwLock<Option<Arc<RegistryEntry>>>,
    /// Serializes publishes with cache fills so a slow disk read can't clobber a newer entry.
    swap_lock: Mutex<()>,
}

impl ModelRegistry {
    /// Open (creating if needed) a registry rooted at `dir`, keeping `retain` generations on disk.
    pub fn open(dir: impl Into<PathBuf>, retain: usize) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| PersistenceError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            retain: retain.max(1),
            current: RwLock::new(None),
            swap_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The active entry, loading it from disk on first use.
    pub fn current(&self) -> Result<Arc<RegistryEntry>, RegistryError> {
        if let Some(entry) = self.cached() {
            return Ok(entry);
        }
        let _swap = self.swap_lock.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(entry) = self.cached() {
            return Ok(entry);
        }
        self.load_into_cache()?.ok_or_else(|| RegistryError::NoModel {
            dir: self.dir.clone(),
        })
    }

    /// The in-memory entry without touching disk.
    pub fn cached(&self) -> Option<Arc<RegistryEntry>> {
        self.current
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Re-read the published entry from disk, replacing the in-memory copy.
    pub fn reload(&self) -> Result<Option<Arc<RegistryEntry>>, RegistryError> {
        let _swap = self.swap_lock.lock().unwrap_or_else(|err| err.into_inner());
        self.load_into_cache()
    }

    /// Drop the in-memory entry; the next [`Self::current`] reads from disk.
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(|err| err.into_inner()) = None;
    }

    /// Persist `entry` as a new generation and make it the active one.
    ///
    /// On error the previously published entry stays active, both on disk
    /// and in memory.
    pub fn publish(&self, entry: RegistryEntry) -> Result<Arc<RegistryEntry>, PersistenceError> {
        let _swap = self.swap_lock.lock().unwrap_or_else(|err| err.into_inner());
        let pointer = storage::write_generation(&self.dir, &entry)?;
        storage::write_pointer(&self.dir, &pointer)?;

        let entry = Arc::new(entry);
        *self.current.write().unwrap_or_else(|err| err.into_inner()) = Some(Arc::clone(&entry));
        tracing::info!(
            entry_id = %entry.id,
            generation = %pointer.generation,
            accuracy = entry.metrics.accuracy,
            terms = entry.vocabulary.len(),
            "Published model"
        );

        if let Err(err) = storage::prune_generations(&self.dir, &pointer.generation, self.retain) {
            tracing::warn!("Failed to prune old model generations in {}: {err}", self.dir.display());
        }
        Ok(entry)
    }

    fn load_into_cache(&self) -> Result<Option<Arc<RegistryEntry>>, RegistryError> {
        let Some(pointer) = storage::read_pointer(&self.dir)? else {
            // Nothing is published on disk, so nothing may be served from memory either.
            self.invalidate();
            return Ok(None);
        };
        let entry = Arc::new(storage::read_generation(&self.dir, &pointer)?);
        *self.current.write().unwrap_or_else(|err| err.into_inner()) = Some(Arc::clone(&entry));
        tracing::debug!(entry_id = %entry.id, "Loaded published model from disk");
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(super) fn sample_entry(texts: &[&str]) -> RegistryEntry {
        let vocabulary = Vocabulary::fit(texts).unwrap();
        let model = SpamNet::zeros(vocabulary.len(), 4, 2);
        let metrics = EvalMetrics {
            accuracy: 0.75,
            loss: 0.4,
            spam_precision: 1.0,
            spam_recall: 0.5,
            support: 4,
        };
        RegistryEntry::new(vocabulary, model, metrics, texts.len())
    }

    #[test]
    fn empty_registry_reports_no_model() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path().join("models"), 2).unwrap();
        assert!(matches!(registry.current(), Err(RegistryError::NoModel { .. })));
        assert!(registry.reload().unwrap().is_none());
    }

    #[test]
    fn publish_updates_cache_and_disk() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path(), 2).unwrap();
        let published = registry.publish(sample_entry(&["hello friend", "buy now"])).unwrap();
        assert_eq!(registry.current().unwrap().id, published.id);

        let fresh = ModelRegistry::open(dir.path(), 2).unwrap();
        let loaded = fresh.current().unwrap();
        assert_eq!(loaded.id, published.id);
        assert_eq!(loaded.vocabulary, published.vocabulary);
        assert_eq!(loaded.model, published.model);
        assert_eq!(loaded.metrics, published.metrics);
    }

    #[test]
    fn cache_holds_until_invalidated() {
        let dir = tempdir().unwrap();
        let reader = ModelRegistry::open(dir.path(), 3).unwrap();
        let writer = ModelRegistry::open(dir.path(), 3).unwrap();
        let first = writer.publish(sample_entry(&["hello friend", "buy now"])).unwrap();
        assert_eq!(reader.current().unwrap().id, first.id);

        let second = writer.publish(sample_entry(&["see you", "click link"])).unwrap();
        assert_eq!(reader.current().unwrap().id, first.id);
        reader.invalidate();
        assert_eq!(reader.current().unwrap().id, second.id);
    }

    #[test]
    fn reload_without_pointer_drops_the_cached_entry() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path(), 2).unwrap();
        registry.publish(sample_entry(&["hello friend", "buy now"])).unwrap();
        assert!(registry.cached().is_some());

        std::fs::remove_file(dir.path().join(POINTER_FILE)).unwrap();
        assert!(registry.reload().unwrap().is_none());
        assert!(registry.cached().is_none());
        assert!(matches!(registry.current(), Err(RegistryError::NoModel { .. })));
    }

    #[test]
    fn prunes_generations_beyond_retention() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path(), 2).unwrap();
        for _ in 0..4 {
            registry.publish(sample_entry(&["hello friend", "buy now"])).unwrap();
        }
        let generations = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .count();
        assert_eq!(generations, 2);
        registry.reload().unwrap().unwrap();
    }
}
