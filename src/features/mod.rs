//! Text feature extraction: tokenization and TF-IDF vectors.

use thiserror::Error;

mod tfidf;
mod tokenize;

pub use tfidf::{SparseVector, Vocabulary};
pub use tokenize::tokenize;

/// Errors raised while fitting a vocabulary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    /// No documents were supplied.
    #[error("Cannot fit a vocabulary on an empty corpus")]
    EmptyCorpus,
    /// The corpus produced no usable terms.
    #[error("Vocabulary is empty; no document contains a term of two or more word characters")]
    EmptyVocabulary,
}
