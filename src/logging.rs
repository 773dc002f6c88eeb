//! Logging setup for the operator CLI and embedding bots.
//!
//! One global tracing subscriber feeds stderr and a log file created per
//! launch under `<app root>/logs`. Only the newest [`KEEP_LOG_FILES`] files
//! survive a launch.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::{app_dirs, config};

/// Log files kept after pruning, including the one for this launch.
pub const KEEP_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "spamshield";
const DEFAULT_FILTER: &str = "info";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Log directory unavailable: {0}")]
    AppDir(#[from] app_dirs::AppDirError),
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log file timestamp: {0}")]
    FormatTime(#[from] time::error::Format),
    #[error("Another tracing subscriber is already installed: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Directory of per-launch `spamshield_<timestamp>.log` files.
struct LogDir {
    path: PathBuf,
}

impl LogDir {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create the file for a launch at `started` and return its name.
    fn open_launch_file(&self, started: OffsetDateTime) -> Result<String, LoggingError> {
        let name = launch_file_name(started)?;
        let path = self.path.join(&name);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LoggingError::Io {
                action: "create log file",
                path,
                source,
            })?;
        Ok(name)
    }

    /// Oldest first, by modification time.
    fn log_files(&self) -> Result<Vec<PathBuf>, LoggingError> {
        let entries = fs::read_dir(&self.path).map_err(|source| LoggingError::Io {
            action: "list log directory",
            path: self.path.clone(),
            source,
        })?;
        let mut files: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
            .map(|entry| entry.path())
            .filter(|path| is_launch_log(path))
            .map(|path| {
                let modified = fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Delete all but the newest `keep` launch logs; returns how many went.
    fn prune(&self, keep: usize) -> Result<usize, LoggingError> {
        let files = self.log_files()?;
        let excess = files.len().saturating_sub(keep);
        for path in files.into_iter().take(excess) {
            fs::remove_file(&path).map_err(|source| LoggingError::Io {
                action: "remove old log file",
                path,
                source,
            })?;
        }
        Ok(excess)
    }
}

fn is_launch_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log")
}

/// Install the stderr and file subscriber, then record where data lives.
///
/// Later calls return `Ok(())` without touching the installed subscriber.
/// On error the caller keeps running without file logs.
pub fn init() -> Result<(), LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs = LogDir::new(app_dirs::logs_dir()?);
    let file_name = logs.open_launch_file(launch_time())?;
    let pruned = logs.prune(KEEP_LOG_FILES)?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&logs.path, &file_name));

    let timer = display_timer();
    let subscriber = Registry::default()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_timer(timer.clone())
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!(
        log_file = %logs.path.join(&file_name).display(),
        pruned,
        "Logging initialized"
    );
    log_locations();
    Ok(())
}

/// Default data locations, after environment overrides. A `--config` file may still move them.
fn log_locations() {
    let settings = config::Settings::default();
    match (
        app_dirs::app_root_dir(),
        settings.resolved_dataset_path(),
        settings.resolved_model_dir(),
    ) {
        (Ok(root), Ok(dataset), Ok(models)) => tracing::info!(
            root = %root.display(),
            dataset = %dataset.display(),
            models = %models.display(),
            "Application locations"
        ),
        _ => tracing::warn!("Application locations could not be resolved"),
    }
}

fn launch_file_name(started: OffsetDateTime) -> Result<String, LoggingError> {
    const STAMP: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    Ok(format!("{LOG_FILE_PREFIX}_{}.log", started.format(STAMP)?))
}

fn launch_time() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn display_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const STAMP: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, STAMP.into())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn launch_file_is_named_after_its_start_time() {
        let dir = tempdir().unwrap();
        let started = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let name = LogDir::new(dir.path()).open_launch_file(started).unwrap();
        assert_eq!(name, "spamshield_2023-11-14_22-13-20.log");
        assert!(dir.path().join(name).is_file());
    }

    #[test]
    fn prune_keeps_the_newest_launch_logs_only() {
        let dir = tempdir().unwrap();
        let logs = LogDir::new(dir.path());
        for second in 0..12 {
            let started = OffsetDateTime::from_unix_timestamp(1_700_000_000 + second).unwrap();
            logs.open_launch_file(started).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        fs::write(dir.path().join("other.log"), "not ours").unwrap();

        assert_eq!(logs.prune(KEEP_LOG_FILES).unwrap(), 2);
        assert_eq!(logs.log_files().unwrap().len(), KEEP_LOG_FILES);
        assert!(!dir.path().join("spamshield_2023-11-14_22-13-20.log").exists());
        assert!(!dir.path().join("spamshield_2023-11-14_22-13-21.log").exists());
        assert!(dir.path().join("spamshield_2023-11-14_22-13-31.log").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("other.log").exists());
        assert_eq!(logs.prune(KEEP_LOG_FILES).unwrap(), 0);
    }
}
