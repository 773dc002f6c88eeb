//! Crash-safe file replacement helpers shared by the config and model registry.

use std::io::Write;
use std::path::Path;

use rand::TryRngCore;

const TEMP_NAME_ATTEMPTS: usize = 5;

/// Replace `path` with `data` so readers see either the old or the new contents.
///
/// The bytes go to a randomly-suffixed sibling file which is fsynced and then
/// renamed over the target; the parent directory is fsynced afterwards.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
    })?;

    let mut last_err = None;
    for _ in 0..TEMP_NAME_ATTEMPTS {
        let tmp_path = dir.join(format!("{}.tmp-{}", file_name.to_string_lossy(), random_suffix()?));
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path);
        let mut file = match file {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                last_err = Some(err);
                continue;
            }
            Err(err) => return Err(err),
        };

        let written = file.write_all(data).and_then(|()| file.sync_all());
        drop(file);
        if let Err(err) = written.and_then(|()| replace_file(&tmp_path, path)) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }
        return sync_dir(dir);
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "failed to create temporary file for {}: {}",
            path.display(),
            last_err
                .as_ref()
                .map(|err| err.to_string())
                .unwrap_or_else(|| "unknown error".into())
        ),
    ))
}

/// Write `data` to a brand-new file and flush it to disk.
pub fn write_new_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Flush directory metadata (new entries, renames) on platforms that support it.
pub fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

fn random_suffix() -> std::io::Result<String> {
    let mut bytes = [0u8; 6];
    rand::rngs::OsRng.try_fill_bytes(&mut bytes).map_err(|source| {
        std::io::Error::other(format!("failed to generate temporary file suffix: {source}"))
    })?;
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

fn replace_file(temp_path: &Path, path: &Path) -> std::io::Result<()> {
    match std::fs::rename(temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            #[cfg(target_os = "windows")]
            if err.kind() == std::io::ErrorKind::AlreadyExists
                || err.kind() == std::io::ErrorKind::PermissionDenied
            {
                if let Err(inner) = std::fs::remove_file(path) {
                    if inner.kind() != std::io::ErrorKind::NotFound {
                        return Err(inner);
                    }
                }
                std::fs::rename(temp_path, path)?;
                return Ok(());
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_contents_without_leftovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("current.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn write_new_synced_refuses_to_clobber() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        write_new_synced(&path, b"a").unwrap();
        let err = write_new_synced(&path, b"b").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"a");
    }
}
