use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{FeatureError, tokenize};

/// Sparse feature row with ascending column indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    /// Full dimensionality (vocabulary size).
    pub dim: usize,
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices
            .iter()
            .zip(self.values.iter())
            .map(|(&idx, &value)| (idx as usize, value))
    }

    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0f32; self.dim];
        for (idx, value) in self.iter() {
            dense[idx] = value;
        }
        dense
    }
}

/// Fitted term-to-column mapping with smoothed inverse document frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Term to column index; columns follow lexicographic term order.
    pub terms: BTreeMap<String, u32>,
    /// IDF weight per column.
    pub idf: Vec<f32>,
    /// Number of documents the vocabulary was fit on.
    pub documents: usize,
}

impl Vocabulary {
    /// Fit a vocabulary on `texts`. Identical input always yields an identical vocabulary.
    pub fn fit<S: AsRef<str>>(texts: &[S]) -> Result<Self, FeatureError> {
        if texts.is_empty() {
            return Err(FeatureError::EmptyCorpus);
        }
        let mut document_freq: BTreeMap<String, u32> = BTreeMap::new();
        for text in texts {
            let unique: BTreeSet<String> = tokenize(text.as_ref()).into_iter().collect();
            for term in unique {
                *document_freq.entry(term).or_insert(0) += 1;
            }
        }
        if document_freq.is_empty() {
            return Err(FeatureError::EmptyVocabulary);
        }

        let n = texts.len() as f64;
        let mut terms = BTreeMap::new();
        let mut idf = Vec::with_capacity(document_freq.len());
        for (column, (term, df)) in document_freq.into_iter().enumerate() {
            terms.insert(term, column as u32);
            idf.push((((1.0 + n) / (1.0 + df as f64)).ln() + 1.0) as f32);
        }
        Ok(Self {
            terms,
            idf,
            documents: texts.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.idf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idf.is_empty()
    }

    /// Term counts weighted by IDF and L2-normalized. Unknown terms are ignored.
    pub fn transform(&self, text: &str) -> SparseVector {
        let mut counts: BTreeMap<u32, f32> = BTreeMap::new();
        for term in tokenize(text) {
            if let Some(&column) = self.terms.get(&term) {
                *counts.entry(column).or_insert(0.0) += 1.0;
            }
        }
        let mut indices = Vec::with_capacity(counts.len());
        let mut values = Vec::with_capacity(counts.len());
        for (column, count) in counts {
            indices.push(column);
            values.push(count * self.idf[column as usize]);
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        SparseVector {
            dim: self.len(),
            indices,
            values,
        }
    }

    /// Stable content hash used to pair a model with the vocabulary it was trained on.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (term, column) in &self.terms {
            hasher.update(term.as_bytes());
            hasher.update(&[0]);
            hasher.update(&column.to_le_bytes());
        }
        for weight in &self.idf {
            hasher.update(&weight.to_bits().to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Check structural invariants after deserialization.
    pub fn validate(&self) -> Result<(), String> {
        if self.idf.is_empty() {
            return Err("vocabulary has no terms".to_string());
        }
        if self.terms.len() != self.idf.len() {
            return Err(format!(
                "vocabulary has {} terms but {} idf weights",
                self.terms.len(),
                self.idf.len()
            ));
        }
        let columns: BTreeSet<u32> = self.terms.values().copied().collect();
        if columns.len() != self.terms.len() || columns.iter().any(|&c| c as usize >= self.idf.len()) {
            return Err("vocabulary columns are not a permutation of 0..len".to_string());
        }
        if self.idf.iter().any(|w| !w.is_finite()) {
            return Err("vocabulary contains non-finite idf weights".to_string());
        }
        Ok(())
    }
}
