//! Labeled message corpus backing the spam classifier.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod store;

pub use store::DatasetStore;

/// Class label attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Legitimate message.
    Ham,
    /// Unwanted message.
    Spam,
}

impl Label {
    /// Token written at the start of each dataset line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ham => "ham",
            Self::Spam => "spam",
        }
    }

    /// Binary training target (`spam = 1`).
    pub fn target(self) -> f32 {
        match self {
            Self::Ham => 0.0,
            Self::Spam => 1.0,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ham" => Ok(Self::Ham),
            "spam" => Ok(Self::Spam),
            other => Err(format!("unknown label {other:?} (expected ham or spam)")),
        }
    }
}

/// One record of the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledExample {
    pub label: Label,
    pub text: String,
}

impl LabeledExample {
    /// Build an example, collapsing line breaks so it fits on one dataset line.
    pub fn new(label: Label, text: &str) -> Result<Self, DatasetError> {
        let text = normalize_text(text);
        if text.is_empty() {
            return Err(DatasetError::EmptyText);
        }
        Ok(Self { label, text })
    }

    /// Render the example as a dataset line without the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{} {}", self.label, self.text)
    }
}

/// Errors raised while reading or appending dataset records.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The dataset file does not exist.
    #[error("Dataset file not found at {path}")]
    Missing { path: PathBuf },
    /// The dataset file contains no records.
    #[error("Dataset at {path} has no records")]
    Empty { path: PathBuf },
    /// A line could not be parsed as `<label> <text>`.
    #[error("Malformed record on line {line} of {path}: {reason}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    /// The example text was empty after normalization.
    #[error("Example text is empty")]
    EmptyText,
    /// Failed to read from the dataset file.
    #[error("Failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to append to the dataset file.
    #[error("Failed to append to dataset {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Join the lines of `text` with single spaces, dropping blank lines.
///
/// Every Unicode line boundary counts, not just `\n`, so a stored record can
/// never be split by a reader with a wider notion of newline.
pub fn normalize_text(text: &str) -> String {
    text.split(is_line_break)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}'..='\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Parse one dataset line, splitting on the first whitespace run only.
pub(crate) fn parse_line(line: &str) -> Result<LabeledExample, String> {
    let line = line.trim();
    let Some((label, text)) = line.split_once(char::is_whitespace) else {
        return Err(if line.parse::<Label>().is_ok() {
            "record has no message text".to_string()
        } else {
            "record has no label token".to_string()
        });
    };
    let label = label.parse::<Label>()?;
    let text = text.trim_start();
    if text.is_empty() {
        return Err("record has no message text".to_string());
    }
    Ok(LabeledExample {
        label,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_line_breaks() {
        assert_eq!(normalize_text("buy\r\ncrypto\n\n  now  "), "buy crypto now");
        assert_eq!(normalize_text("single line"), "single line");
        assert_eq!(normalize_text("\n \n"), "");
    }

    #[test]
    fn normalize_collapses_every_unicode_line_break() {
        assert_eq!(
            normalize_text("buy\rcrypto\u{2028}now\u{85}x"),
            "buy crypto now x"
        );
        assert_eq!(
            normalize_text("a\u{0b}b\u{0c}c\u{1c}d\u{1d}e\u{1e}f\u{2029}g"),
            "a b c d e f g"
        );
        let line = LabeledExample::new(Label::Spam, "win\r\rbig\u{2028}")
            .unwrap()
            .to_line();
        assert_eq!(line, "spam win big");
    }

    #[test]
    fn parse_splits_on_first_whitespace_run() {
        let example = parse_line("spam  click this   link").unwrap();
        assert_eq!(example.label, Label::Spam);
        assert_eq!(example.text, "click this   link");

        let example = parse_line("ham\thello friend").unwrap();
        assert_eq!(example.label, Label::Ham);
        assert_eq!(example.text, "hello friend");
    }

    #[test]
    fn parse_rejects_unknown_and_missing_parts() {
        assert!(parse_line("notalabel hello").is_err());
        assert!(parse_line("SPAM hello").is_err());
        assert!(parse_line("spam").is_err());
        assert!(parse_line("hello").is_err());
    }

    #[test]
    fn new_example_rejects_blank_text() {
        assert!(matches!(
            LabeledExample::new(Label::Ham, " \n "),
            Err(DatasetError::EmptyText)
        ));
        let example = LabeledExample::new(Label::Spam, "win\nnow").unwrap();
        assert_eq!(example.to_line(), "spam win now");
    }
}
