use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{DatasetError, Label, LabeledExample, parse_line};

/// Append-only, line-oriented dataset file.
///
/// Appends and loads share one lock so a load never observes a half-written
/// record from this process.
#[derive(Debug)]
pub struct DatasetStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one example as a new line, creating the file if needed.
    pub fn append(&self, example: &LabeledExample) -> Result<(), DatasetError> {
        let _guard = self.lock.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.write_error(source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.write_error(source))?;

        let mut record = String::new();
        if !ends_with_newline(&mut file).map_err(|source| self.write_error(source))? {
            record.push('\n');
        }
        record.push_str(&example.to_line());
        record.push('\n');
        file.write_all(record.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|source| self.write_error(source))?;
        tracing::debug!(label = %example.label, path = %self.path.display(), "Appended dataset record");
        Ok(())
    }

    /// Convenience wrapper around [`LabeledExample::new`] + [`Self::append`].
    pub fn append_text(&self, label: Label, text: &str) -> Result<LabeledExample, DatasetError> {
        let example = LabeledExample::new(label, text)?;
        self.append(&example)?;
        Ok(example)
    }

    /// Parse every record. A blank or malformed line fails the whole load.
    pub fn load_all(&self) -> Result<Vec<LabeledExample>, DatasetError> {
        let _guard = self.lock.lock().unwrap_or_else(|err| err.into_inner());
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DatasetError::Missing {
                    path: self.path.clone(),
                });
            }
            Err(source) => return Err(self.read_error(source)),
        };

        let mut examples = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| self.read_error(source))?;
            let example = parse_line(&line).map_err(|reason| DatasetError::MalformedRecord {
                path: self.path.clone(),
                line: idx + 1,
                reason,
            })?;
            examples.push(example);
        }
        if examples.is_empty() {
            return Err(DatasetError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(examples)
    }

    fn read_error(&self, source: std::io::Error) -> DatasetError {
        DatasetError::Read {
            path: self.path.clone(),
            source,
        }
    }

    fn write_error(&self, source: std::io::Error) -> DatasetError {
        DatasetError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_load_preserves_records() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path().join("data").join("dataset.txt"));
        store.append_text(Label::Ham, "hello friend").unwrap();
        store.append_text(Label::Spam, "buy crypto\nnow").unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "ham hello friend\nspam buy crypto now\n");

        let examples = store.load_all().unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1].label, Label::Spam);
        assert_eq!(examples[1].text, "buy crypto now");
    }

    #[test]
    fn append_starts_a_new_line_after_unterminated_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.txt");
        std::fs::write(&path, "ham see you tomorrow").unwrap();
        let store = DatasetStore::new(&path);
        store.append_text(Label::Spam, "click this link").unwrap();

        let examples = store.load_all().unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].text, "see you tomorrow");
        assert_eq!(examples[1].text, "click this link");
    }

    #[test]
    fn malformed_line_fails_the_whole_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.txt");
        std::fs::write(&path, "ham hello friend\nnotalabel hello\nspam win\n").unwrap();
        let err = DatasetStore::new(&path).load_all().unwrap_err();
        match err {
            DatasetError::MalformedRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_and_empty_files_are_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.txt");
        assert!(matches!(
            DatasetStore::new(&path).load_all(),
            Err(DatasetError::Missing { .. })
        ));
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            DatasetStore::new(&path).load_all(),
            Err(DatasetError::Empty { .. })
        ));
    }

    #[test]
    fn blank_line_is_a_malformed_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.txt");
        std::fs::write(&path, "ham hello friend\n\nspam win big\n").unwrap();
        match DatasetStore::new(&path).load_all().unwrap_err() {
            DatasetError::MalformedRecord { line, reason, .. } => {
                assert_eq!(line, 2);
                assert_eq!(reason, "record has no label token");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn appended_record_stays_on_one_line() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path().join("dataset.txt"));
        store
            .append_text(Label::Spam, "buy\rcrypto\u{2028}now\u{85}x")
            .unwrap();
        store.append_text(Label::Ham, "see you").unwrap();

        let raw = std::fs::read(store.path()).unwrap();
        assert!(!raw.contains(&b'\r'));
        let raw = String::from_utf8(raw).unwrap();
        assert_eq!(raw, "spam buy crypto now x\nham see you\n");
        assert_eq!(store.load_all().unwrap().len(), 2);
    }
}
