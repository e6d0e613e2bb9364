//! Hybrid retrieval over one corpus: dense ANN hits and sparse
//! term-frequency hits are fused with a configurable mix.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use common::error::AppError;
use common::storage::types::chunk::ChunkRecord;
use common::utils::embedding::EmbeddingProvider;
use common::vector::{EqFilter, VectorCollection};

use crate::cache::DatasetEntry;

/// A retrieved chunk with its fused retrieval score.
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub record: ChunkRecord,
    pub hybrid_score: f32,
}

/// Fused retrieval for one corpus.
///
/// Candidates come from the dense search (which enforces the metadata
/// filter) and, only when no filter is active, from the sparse search as
/// well. The sparse index cannot honor metadata predicates, so under a
/// filter it merely re-scores the dense candidates.
#[instrument(skip_all, fields(collection = collection.table(), top_k))]
pub async fn hybrid_search(
    collection: &VectorCollection,
    entry: &Arc<DatasetEntry>,
    embedder: &EmbeddingProvider,
    query: &str,
    top_k: usize,
    alpha: f32,
    filter: Option<&EqFilter>,
) -> Result<Vec<HybridHit>, AppError> {
    if entry.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    // Over-fetch so the fusion has candidates to rerank.
    let limit = top_k * 3;

    let query_embedding = embedder.embed(query).await?;
    let dense_hits = collection
        .query_nearest(&query_embedding, limit, filter)
        .await?;
    let dense_scores: HashMap<String, f32> = dense_hits
        .into_iter()
        .map(|hit| (hit.chunk_id, 1.0 - hit.distance))
        .collect();

    // The sparse scan is pure compute over the whole matrix; run it off the
    // async workers.
    let sparse_entry = entry.clone();
    let sparse_query = query.to_string();
    let sparse_scores: HashMap<String, f32> = tokio::task::spawn_blocking(move || {
        let query_matrix = sparse_entry
            .sparse
            .vectorizer
            .transform(std::slice::from_ref(&sparse_query));
        let Some(query_row) = query_matrix.row(0) else {
            return HashMap::new();
        };
        let scores = sparse_entry.sparse.matrix.cosine_scores(query_row);

        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
            .into_iter()
            .take(limit)
            .filter_map(|(idx, score)| {
                Some((sparse_entry.chunks.get(idx)?.chunk_id.clone(), score))
            })
            .collect()
    })
    .await?;

    // Under a metadata filter only dense candidates are trustworthy.
    let candidates: HashSet<&String> = if filter.is_some() {
        dense_scores.keys().collect()
    } else {
        dense_scores.keys().chain(sparse_scores.keys()).collect()
    };

    let mut fused: Vec<(String, f32)> = candidates
        .into_iter()
        .map(|chunk_id| {
            let dense = dense_scores.get(chunk_id).copied().unwrap_or(0.0);
            let sparse = sparse_scores.get(chunk_id).copied().unwrap_or(0.0);
            (chunk_id.clone(), alpha * dense + (1.0 - alpha) * sparse)
        })
        .collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    debug!(
        dense = dense_scores.len(),
        sparse = sparse_scores.len(),
        fused = fused.len(),
        "Hybrid candidate sets"
    );

    let hits = fused
        .into_iter()
        .take(top_k)
        .filter_map(|(chunk_id, score)| {
            // Ids unknown to the chunk table (already deleted) are skipped.
            let record = entry.get(&chunk_id)?.clone();
            Some(HybridHit {
                record,
                hybrid_score: score,
            })
        })
        .collect();

    Ok(hits)
}

/// Hybrid retrieval that also fills in a display title extracted from the
/// chunk body, the shape downstream context building expects.
pub async fn hybrid_search_with_meta(
    collection: &VectorCollection,
    entry: &Arc<DatasetEntry>,
    embedder: &EmbeddingProvider,
    query: &str,
    top_k: usize,
    alpha: f32,
    filter: Option<&EqFilter>,
) -> Result<Vec<HybridHit>, AppError> {
    let mut hits = hybrid_search(collection, entry, embedder, query, top_k, alpha, filter).await?;
    for hit in &mut hits {
        hit.record.title = extract_title(&hit.record.chunk_text);
    }
    Ok(hits)
}

/// Display title: the bracketed prefix when present, otherwise the first
/// line capped at 120 characters.
pub fn extract_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(closing) = rest.find(']') {
            return rest[..closing].trim().to_string();
        }
    }
    trimmed
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .take(120)
        .collect()
}
