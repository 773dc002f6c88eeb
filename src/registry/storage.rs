use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MODEL_FILE, POINTER_FILE, PersistenceError, RegistryEntry, RegistryError, VOCABULARY_FILE};
use crate::features::Vocabulary;
use crate::fs_ops;
use crate::ml::metrics::EvalMetrics;
use crate::ml::mlp::SpamNet;

const GENERATION_PREFIX: &str = "gen-";

/// Contents of `current.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct Pointer {
    pub entry_id: Uuid,
    pub generation: String,
    pub vocabulary_blake3: String,
    pub model_blake3: String,
    pub metrics: EvalMetrics,
    pub examples: usize,
    pub trained_at: i64,
}

#[derive(Serialize, Deserialize)]
struct VocabularyArtifact<V> {
    entry_id: Uuid,
    vocabulary: V,
}

#[derive(Serialize, Deserialize)]
struct ModelArtifact<M> {
    entry_id: Uuid,
    vocabulary_fingerprint: String,
    model: M,
}

/// Write both artifacts of `entry` into a new generation directory.
pub(super) fn write_generation(dir: &Path, entry: &RegistryEntry) -> Result<Pointer, PersistenceError> {
    let generation = format!("{GENERATION_PREFIX}{}", entry.id.simple());
    let gen_dir = dir.join(&generation);
    std::fs::create_dir_all(&gen_dir).map_err(|source| PersistenceError::CreateDir {
        path: gen_dir.clone(),
        source,
    })?;

    let vocabulary_path = gen_dir.join(VOCABULARY_FILE);
    let vocabulary_bytes = to_json(
        &vocabulary_path,
        &VocabularyArtifact {
            entry_id: entry.id,
            vocabulary: &entry.vocabulary,
        },
    )?;
    let model_path = gen_dir.join(MODEL_FILE);
    let model_bytes = to_json(
        &model_path,
        &ModelArtifact {
            entry_id: entry.id,
            vocabulary_fingerprint: entry.vocabulary.fingerprint(),
            model: &entry.model,
        },
    )?;

    write_synced(&vocabulary_path, &vocabulary_bytes)?;
    write_synced(&model_path, &model_bytes)?;
    fs_ops::sync_dir(&gen_dir).map_err(|source| PersistenceError::Write {
        path: gen_dir.clone(),
        source,
    })?;

    Ok(Pointer {
        entry_id: entry.id,
        generation,
        vocabulary_blake3: blake3::hash(&vocabulary_bytes).to_hex().to_string(),
        model_blake3: blake3::hash(&model_bytes).to_hex().to_string(),
        metrics: entry.metrics,
        examples: entry.examples,
        trained_at: entry.trained_at,
    })
}

/// Atomically replace `current.json`.
pub(super) fn write_pointer(dir: &Path, pointer: &Pointer) -> Result<(), PersistenceError> {
    let path = dir.join(POINTER_FILE);
    let bytes = serde_json::to_vec_pretty(pointer).map_err(|source| PersistenceError::Serialize {
        path: path.clone(),
        source,
    })?;
    fs_ops::atomic_write(&path, &bytes).map_err(|source| PersistenceError::Write { path, source })
}

pub(super) fn read_pointer(dir: &Path) -> Result<Option<Pointer>, PersistenceError> {
    let path = dir.join(POINTER_FILE);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(PersistenceError::Read { path, source }),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistenceError::Parse { path, source })
}

/// Load and cross-check the pair the pointer refers to.
pub(super) fn read_generation(dir: &Path, pointer: &Pointer) -> Result<RegistryEntry, RegistryError> {
    let gen_dir = dir.join(&pointer.generation);
    let vocabulary_path = gen_dir.join(VOCABULARY_FILE);
    let model_path = gen_dir.join(MODEL_FILE);
    let vocabulary_bytes = read_artifact(&vocabulary_path, &pointer.vocabulary_blake3)?;
    let model_bytes = read_artifact(&model_path, &pointer.model_blake3)?;

    let vocabulary: VocabularyArtifact<Vocabulary> = from_json(&vocabulary_path, &vocabulary_bytes)?;
    let model: ModelArtifact<SpamNet> = from_json(&model_path, &model_bytes)?;
    vocabulary
        .vocabulary
        .validate()
        .map_err(|reason| invalid(&vocabulary_path, reason))?;
    model.model.validate().map_err(|reason| invalid(&model_path, reason))?;

    if vocabulary.entry_id != pointer.entry_id || model.entry_id != pointer.entry_id {
        return Err(RegistryError::VersionMismatch {
            reason: format!(
                "pointer names entry {} but vectorizer is {} and classifier is {}",
                pointer.entry_id, vocabulary.entry_id, model.entry_id
            ),
        });
    }
    let fingerprint = vocabulary.vocabulary.fingerprint();
    if model.vocabulary_fingerprint != fingerprint {
        return Err(RegistryError::VersionMismatch {
            reason: format!(
                "classifier was trained on vocabulary {} but vectorizer is {}",
                model.vocabulary_fingerprint, fingerprint
            ),
        });
    }
    if model.model.input_dim != vocabulary.vocabulary.len() {
        return Err(RegistryError::VersionMismatch {
            reason: format!(
                "classifier expects {} features but vocabulary has {} terms",
                model.model.input_dim,
                vocabulary.vocabulary.len()
            ),
        });
    }

    Ok(RegistryEntry {
        id: pointer.entry_id,
        vocabulary: vocabulary.vocabulary,
        model: model.model,
        metrics: pointer.metrics,
        examples: pointer.examples,
        trained_at: pointer.trained_at,
    })
}

/// Remove generation directories other than `current`, keeping `retain` in total.
pub(super) fn prune_generations(dir: &Path, current: &str, retain: usize) -> std::io::Result<usize> {
    let mut stale: Vec<(SystemTime, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(GENERATION_PREFIX) && name != current
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();

    // Newest first; everything past the retention budget goes.
    stale.sort_by(|a, b| b.0.cmp(&a.0));
    let keep_previous = retain.saturating_sub(1);
    let mut removed = 0;
    for (_, path) in stale.into_iter().skip(keep_previous) {
        std::fs::remove_dir_all(&path)?;
        tracing::debug!("Removed stale model generation {}", path.display());
        removed += 1;
    }
    Ok(removed)
}

fn read_artifact(path: &Path, expected_blake3: &str) -> Result<Vec<u8>, PersistenceError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(PersistenceError::MissingArtifact {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if blake3::hash(&bytes).to_hex().as_str() != expected_blake3 {
        return Err(PersistenceError::ChecksumMismatch {
            path: path.to_path_buf(),
        });
    }
    Ok(bytes)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    fs_ops::write_new_synced(path, bytes).map_err(|source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn to_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(value).map_err(|source| PersistenceError::Serialize {
        path: path.to_path_buf(),
        source,
    })
}

fn from_json<T: serde::de::DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T, PersistenceError> {
    serde_json::from_slice(bytes).map_err(|source| PersistenceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path, reason: String) -> PersistenceError {
    PersistenceError::InvalidArtifact {
        path: path.to_path_buf(),
        reason,
    }
}
