#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use spamshield::SpamShield;
use spamshield::config::Settings;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub const DATASET: &str = "\
ham hello friend
spam buy crypto now
spam click this link
ham see you tomorrow
";

/// Sets environment variables for the lifetime of the guard.
pub struct EnvGuard {
    previous: Vec<(&'static str, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    pub fn set(vars: &[(&'static str, &Path)]) -> Self {
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let mut previous = Vec::with_capacity(vars.len());
        for (key, value) in vars {
            previous.push((*key, std::env::var(key).ok()));
            // SAFETY: tests run under a global lock to prevent concurrent env mutations.
            unsafe {
                std::env::set_var(key, value);
            }
        }
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.previous.drain(..) {
            match value {
                // SAFETY: tests run under a global lock to prevent concurrent env mutations.
                Some(value) => unsafe { std::env::set_var(key, value) },
                // SAFETY: as above.
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

/// `times` copies of `dataset`, so every text lands in the training partition.
pub fn repeated(dataset: &str, times: usize) -> String {
    dataset.repeat(times)
}

pub fn write_dataset(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("dataset.txt");
    std::fs::write(&path, contents).expect("write dataset");
    path
}

/// Small network that fits a handful of messages reliably.
pub fn fitting_settings(seed: u64) -> Settings {
    let mut settings = Settings::default();
    settings.retrain_on_start = false;
    let network = &mut settings.training.network;
    network.hidden1 = 32;
    network.hidden2 = 16;
    network.epochs = 150;
    network.batch_size = 8;
    network.learning_rate = 0.01;
    network.seed = seed;
    settings
}

/// Tiny, fast configuration for tests that don't care about accuracy.
pub fn quick_settings() -> Settings {
    let mut settings = Settings::default();
    settings.retrain_on_start = false;
    settings.training.network.hidden1 = 8;
    settings.training.network.hidden2 = 4;
    settings.training.network.epochs = 3;
    settings
}

pub fn open_shield(dir: &Path, dataset: &str, settings: &Settings) -> SpamShield {
    let dataset_path = write_dataset(dir, dataset);
    SpamShield::with_paths(dataset_path, dir.join("models"), settings).expect("open shield")
}
