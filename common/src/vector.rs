//! Per-corpus vector collections backed by HNSW-indexed SurrealDB tables.
//!
//! A collection stores `(document, metadata, embedding)` per chunk id and
//! supports the four operations the retrieval and ingestion paths need:
//! upsert, delete, nearest-neighbor query with an optional single-key
//! equality filter, and listing all ids. Richer filtering happens post-hoc
//! in memory.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;

/// Vector upserts are chunked so one call never exceeds this many rows.
pub const UPSERT_BATCH_SIZE: usize = 5000;

/// Search breadth for the HNSW traversal.
const KNN_EF: usize = 100;

/// Single-key equality filter, the only predicate the collection enforces
/// itself (`{key: {$eq: value}}` in the external contract).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqFilter {
    pub field: String,
    pub value: String,
}

/// One nearest-neighbor hit: cosine distance plus the stored metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct NearestHit {
    pub chunk_id: String,
    pub distance: f32,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[derive(Clone)]
pub struct VectorCollection {
    db: Arc<SurrealDbClient>,
    table: String,
}

#[derive(Serialize)]
struct UpsertRow {
    id: String,
    document: String,
    meta: serde_json::Value,
    embedding: Vec<f32>,
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl VectorCollection {
    pub fn new(db: Arc<SurrealDbClient>, table: &str) -> Result<Self, AppError> {
        if !valid_identifier(table) {
            return Err(AppError::Validation(format!(
                "invalid collection name '{table}'"
            )));
        }
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// (Re)defines the HNSW index for this collection with the active
    /// embedding dimension.
    pub async fn ensure_index(&self, dimension: usize) -> Result<(), AppError> {
        self.db
            .client
            .query(format!(
                "DEFINE INDEX OVERWRITE idx_hnsw_{table} ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE",
                table = self.table,
            ))
            .await?
            .check()?;
        Ok(())
    }

    /// Upserts documents with their metadata and embeddings, batched to the
    /// store's call limit. Parallel input slices must have equal lengths.
    pub async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[serde_json::Value],
        embeddings: &[Vec<f32>],
    ) -> Result<(), AppError> {
        if ids.len() != documents.len()
            || ids.len() != metadatas.len()
            || ids.len() != embeddings.len()
        {
            return Err(AppError::Validation(
                "upsert requires parallel ids/documents/metadatas/embeddings".to_string(),
            ));
        }

        for batch_start in (0..ids.len()).step_by(UPSERT_BATCH_SIZE) {
            let batch_end = (batch_start + UPSERT_BATCH_SIZE).min(ids.len());
            let rows: Vec<UpsertRow> = (batch_start..batch_end)
                .filter_map(|i| {
                    Some(UpsertRow {
                        id: ids.get(i)?.clone(),
                        document: documents.get(i)?.clone(),
                        meta: metadatas.get(i)?.clone(),
                        embedding: embeddings.get(i)?.clone(),
                    })
                })
                .collect();

            debug!(
                collection = %self.table,
                rows = rows.len(),
                "Upserting vector batch"
            );

            self.db
                .client
                .query(
                    "FOR $row IN $rows {
                        UPSERT type::thing($tb, $row.id) CONTENT {
                            document: $row.document,
                            meta: $row.meta,
                            embedding: $row.embedding
                        };
                    };",
                )
                .bind(("tb", self.table.clone()))
                .bind(("rows", rows))
                .await?
                .check()?;
        }

        Ok(())
    }

    /// Removes the given chunk ids from the collection.
    pub async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.db
            .client
            .query("FOR $id IN $ids { DELETE type::thing($tb, $id); };")
            .bind(("tb", self.table.clone()))
            .bind(("ids", ids.to_vec()))
            .await?
            .check()?;
        Ok(())
    }

    /// Nearest neighbors by cosine distance, optionally constrained to rows
    /// whose metadata field equals the filter value.
    pub async fn query_nearest(
        &self,
        embedding: &[f32],
        n: usize,
        filter: Option<&EqFilter>,
    ) -> Result<Vec<NearestHit>, AppError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let filter_clause = match filter {
            Some(eq) => {
                if !valid_identifier(&eq.field) {
                    return Err(AppError::Validation(format!(
                        "invalid metadata filter field '{}'",
                        eq.field
                    )));
                }
                format!(" AND meta.{} = $filter_value", eq.field)
            }
            None => String::new(),
        };

        let sql = format!(
            r#"
            SELECT
                record::id(id) AS chunk_id,
                meta,
                vector::distance::cosine(embedding, $embedding) AS distance
            FROM {table}
            WHERE embedding <|{n},{ef}|> $embedding{filter_clause}
            ORDER BY distance ASC
            LIMIT {n};
            "#,
            table = self.table,
            n = n,
            ef = KNN_EF,
        );

        let mut query = self
            .db
            .client
            .query(&sql)
            .bind(("embedding", embedding.to_vec()));
        if let Some(eq) = filter {
            query = query.bind(("filter_value", eq.value.clone()));
        }

        let mut response = query.await?;
        let hits: Vec<NearestHit> = response.take(0).unwrap_or_default();
        Ok(hits)
    }

    /// Every chunk id currently in the collection.
    pub async fn get_all_ids(&self) -> Result<Vec<String>, AppError> {
        let mut response = self
            .db
            .client
            .query(format!("SELECT VALUE record::id(id) FROM {}", self.table))
            .await?;
        let ids: Vec<String> = response.take(0)?;
        Ok(ids)
    }
}
