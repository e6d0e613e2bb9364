//! Term-frequency sparse index: a TF-IDF vectorizer plus the row-major
//! sparse matrix it produces, co-indexed with the in-memory chunk table.
//!
//! The vocabulary is capped at 10 000 features selected by corpus frequency.
//! Rows are l2-normalized, so row-wise cosine similarity reduces to a dot
//! product and always lands in [0, 1].

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Upper bound on the vocabulary size.
pub const MAX_FEATURES: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, u32>,
    idf: Vec<f32>,
}

/// Row-major sparse matrix; each row holds `(feature index, weight)` pairs
/// sorted by feature index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SparseMatrix {
    rows: Vec<Vec<(u32, f32)>>,
}

/// The persisted artifact: vectorizer and matrix travel together, the same
/// way they are trained together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseIndex {
    pub vectorizer: TfidfVectorizer,
    pub matrix: SparseMatrix,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn l2_normalize(row: &mut [(u32, f32)]) {
    let norm = row.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, v) in row.iter_mut() {
            *v /= norm;
        }
    }
}

impl TfidfVectorizer {
    /// Learns a vocabulary and idf weights from the corpus and returns the
    /// fitted vectorizer with the training matrix. An empty corpus is a
    /// caller error.
    pub fn fit(texts: &[String]) -> Result<(TfidfVectorizer, SparseMatrix), AppError> {
        if texts.is_empty() {
            return Err(AppError::Validation(
                "Corpus is empty, cannot train TF-IDF vectorizer.".to_string(),
            ));
        }

        let mut total_counts: HashMap<String, u64> = HashMap::new();
        let mut document_frequency: HashMap<String, u32> = HashMap::new();
        let mut per_doc_counts: Vec<HashMap<String, u32>> = Vec::with_capacity(texts.len());

        for text in texts {
            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in tokenize(text) {
                *counts.entry(token).or_insert(0) += 1;
            }
            for (token, count) in &counts {
                *total_counts.entry(token.clone()).or_insert(0) += u64::from(*count);
                *document_frequency.entry(token.clone()).or_insert(0) += 1;
            }
            per_doc_counts.push(counts);
        }

        // Keep the most frequent terms, then index the survivors in
        // lexicographic order so the feature layout is deterministic.
        let mut terms: Vec<(String, u64)> = total_counts.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(MAX_FEATURES);
        let mut selected: Vec<String> = terms.into_iter().map(|(term, _)| term).collect();
        selected.sort();

        let vocabulary: HashMap<String, u32> = selected
            .into_iter()
            .enumerate()
            .map(|(idx, term)| (term, idx as u32))
            .collect();

        let doc_count = texts.len() as f32;
        let mut idf = vec![0.0f32; vocabulary.len()];
        for (term, idx) in &vocabulary {
            let df = document_frequency.get(term).copied().unwrap_or(0) as f32;
            if let Some(slot) = idf.get_mut(*idx as usize) {
                *slot = ((1.0 + doc_count) / (1.0 + df)).ln() + 1.0;
            }
        }

        let vectorizer = TfidfVectorizer { vocabulary, idf };
        let rows = per_doc_counts
            .into_iter()
            .map(|counts| vectorizer.weigh(&counts))
            .collect();

        Ok((vectorizer, SparseMatrix { rows }))
    }

    /// Vectorizes texts with the existing vocabulary; unseen terms are
    /// ignored.
    pub fn transform(&self, texts: &[String]) -> SparseMatrix {
        let rows = texts
            .iter()
            .map(|text| {
                let mut counts: HashMap<String, u32> = HashMap::new();
                for token in tokenize(text) {
                    *counts.entry(token).or_insert(0) += 1;
                }
                self.weigh(&counts)
            })
            .collect();
        SparseMatrix { rows }
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    fn weigh(&self, counts: &HashMap<String, u32>) -> Vec<(u32, f32)> {
        let mut row: Vec<(u32, f32)> = counts
            .iter()
            .filter_map(|(term, count)| {
                let idx = *self.vocabulary.get(term)?;
                let idf = self.idf.get(idx as usize)?;
                Some((idx, *count as f32 * idf))
            })
            .collect();
        row.sort_by_key(|(idx, _)| *idx);
        l2_normalize(&mut row);
        row
    }
}

impl SparseMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[(u32, f32)]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Vertically stacks another matrix below this one.
    pub fn vstack(&mut self, other: SparseMatrix) {
        self.rows.extend(other.rows);
    }

    /// Cosine similarity of one query row against every matrix row. Rows are
    /// l2-normalized at construction, so this is a sparse dot product.
    pub fn cosine_scores(&self, query: &[(u32, f32)]) -> Vec<f32> {
        self.rows
            .iter()
            .map(|row| sparse_dot(row, query))
            .collect()
    }
}

fn sparse_dot(a: &[(u32, f32)], b: &[(u32, f32)]) -> f32 {
    let mut score = 0.0;
    let mut i = 0;
    let mut j = 0;
    while let (Some(&(ai, av)), Some(&(bi, bv))) = (a.get(i), b.get(j)) {
        match ai.cmp(&bi) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                score += av * bv;
                i += 1;
                j += 1;
            }
        }
    }
    score
}

impl SparseIndex {
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string(self)?;
        fs::write(path, payload)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<SparseIndex, AppError> {
        let payload = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&payload)?)
    }
}
