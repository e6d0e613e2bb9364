//! Per-corpus dataset cache: the in-memory chunk table and sparse index,
//! invalidated by artifact mtimes and extended in place by the moderation
//! path.
//!
//! Each corpus has its own reader-writer slot; the slot map itself is built
//! once at startup and never locked globally. The chunk-row order and the
//! sparse-matrix row order are updated together under one writer section and
//! must never diverge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use common::corpus::{CorpusKey, CorpusSpec};
use common::error::AppError;
use common::sparse::SparseIndex;
use common::storage::types::chunk::ChunkRecord;
use common::utils::config::AppConfig;

/// Hook the catalog uses to build a corpus whose artifacts are not on disk
/// yet. Implemented by the ingestion pipeline.
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn ingest(&self, key: CorpusKey) -> Result<(), AppError>;
}

/// One cached corpus: chunk rows, the id → row index, and the sparse index
/// whose row `i` corresponds to `chunks[i]`.
#[derive(Clone)]
pub struct DatasetEntry {
    pub chunks: Vec<ChunkRecord>,
    pub by_id: HashMap<String, usize>,
    pub sparse: SparseIndex,
    chunk_path: PathBuf,
    chunk_mtime: SystemTime,
    sparse_mtime: SystemTime,
}

impl DatasetEntry {
    pub fn get(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        self.by_id.get(chunk_id).and_then(|idx| self.chunks.get(*idx))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn is_fresh(
        &self,
        chunk_path: &Path,
        chunk_mtime: Option<SystemTime>,
        sparse_mtime: Option<SystemTime>,
    ) -> bool {
        self.chunk_path == chunk_path
            && Some(self.chunk_mtime) == chunk_mtime
            && Some(self.sparse_mtime) == sparse_mtime
    }
}

struct ArtifactStat {
    chunk_path: PathBuf,
    sparse_path: PathBuf,
    chunk_mtime: Option<SystemTime>,
    sparse_mtime: Option<SystemTime>,
}

pub struct DatasetCatalog {
    slots: HashMap<CorpusKey, RwLock<Option<Arc<DatasetEntry>>>>,
    config: AppConfig,
    loader: Option<Arc<dyn DatasetLoader>>,
}

impl DatasetCatalog {
    pub fn new(config: AppConfig, loader: Option<Arc<dyn DatasetLoader>>) -> Self {
        let slots = CorpusKey::ALL
            .into_iter()
            .map(|key| (key, RwLock::new(None)))
            .collect();
        Self {
            slots,
            config,
            loader,
        }
    }

    /// Returns the cached corpus, reloading when the on-disk artifacts
    /// changed and ingesting when they do not exist at all.
    #[instrument(skip(self), fields(corpus = %key))]
    pub async fn ensure(&self, key: CorpusKey) -> Result<Arc<DatasetEntry>, AppError> {
        let slot = self.slot(key)?;

        let stat = self.stat_artifacts(key);
        {
            let guard = slot.read().await;
            if let Some(entry) = guard.as_ref() {
                if entry.is_fresh(&stat.chunk_path, stat.chunk_mtime, stat.sparse_mtime) {
                    return Ok(entry.clone());
                }
            }
        }

        // Neither artifact on disk: build the corpus first, without holding
        // the slot lock so readers of a previously loaded state are not
        // stalled behind remote index writes.
        if stat.chunk_mtime.is_none() || stat.sparse_mtime.is_none() {
            match &self.loader {
                Some(loader) => {
                    info!(corpus = %key, "Artifacts missing; running ingest");
                    loader.ingest(key).await?;
                }
                None => return Err(AppError::DatasetMissing(key.to_string())),
            }
        }

        let mut guard = slot.write().await;

        // Another writer may have reloaded while we waited.
        let stat = self.stat_artifacts(key);
        if let Some(entry) = guard.as_ref() {
            if entry.is_fresh(&stat.chunk_path, stat.chunk_mtime, stat.sparse_mtime) {
                return Ok(entry.clone());
            }
        }

        let (Some(chunk_mtime), Some(sparse_mtime)) = (stat.chunk_mtime, stat.sparse_mtime) else {
            return Err(AppError::DatasetMissing(key.to_string()));
        };

        let chunk_path = stat.chunk_path.clone();
        let sparse_path = stat.sparse_path.clone();
        let (chunks, sparse) = tokio::task::spawn_blocking(move || {
            let chunks = ChunkRecord::read_file(&chunk_path)?;
            let sparse = SparseIndex::load(&sparse_path)?;
            Ok::<_, AppError>((chunks, sparse))
        })
        .await??;

        if chunks.len() != sparse.matrix.len() {
            return Err(AppError::InternalError(format!(
                "corpus '{key}' artifacts misaligned: {} chunk rows vs {} sparse rows",
                chunks.len(),
                sparse.matrix.len()
            )));
        }

        let by_id = chunks
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.chunk_id.clone(), idx))
            .collect();

        let entry = Arc::new(DatasetEntry {
            chunks,
            by_id,
            sparse,
            chunk_path: stat.chunk_path,
            chunk_mtime,
            sparse_mtime,
        });
        debug!(corpus = %key, chunks = entry.len(), "Dataset loaded");
        *guard = Some(entry.clone());
        Ok(entry)
    }

    /// Appends one chunk row to the live corpus without a full reload. The
    /// text is vectorized with the existing vocabulary (new terms stay
    /// unindexed until the next rebuild) and the matrix row is stacked in
    /// the same critical section that extends the chunk table.
    pub async fn append_incremental(
        &self,
        key: CorpusKey,
        record: ChunkRecord,
    ) -> Result<(), AppError> {
        self.ensure(key).await?;
        let slot = self.slot(key)?;
        let mut guard = slot.write().await;
        let entry_arc = guard
            .as_mut()
            .ok_or_else(|| AppError::InternalError(format!("corpus '{key}' vanished from cache")))?;
        let entry = Arc::make_mut(entry_arc);

        let row = entry
            .sparse
            .vectorizer
            .transform(std::slice::from_ref(&record.chunk_text));
        entry.sparse.matrix.vstack(row);
        entry.by_id.insert(record.chunk_id.clone(), entry.chunks.len());
        entry.chunks.push(record);

        info!(
            corpus = %key,
            size = entry.chunks.len(),
            "Incremental dataset update applied"
        );
        Ok(())
    }

    /// Chunk counts per corpus without forcing loads; unloaded corpora
    /// report zero.
    pub async fn counts(&self) -> HashMap<CorpusKey, usize> {
        let mut counts = HashMap::new();
        for key in CorpusKey::ALL {
            let count = match self.slots.get(&key) {
                Some(slot) => slot.read().await.as_ref().map_or(0, |entry| entry.len()),
                None => 0,
            };
            counts.insert(key, count);
        }
        counts
    }

    fn slot(&self, key: CorpusKey) -> Result<&RwLock<Option<Arc<DatasetEntry>>>, AppError> {
        self.slots
            .get(&key)
            .ok_or_else(|| AppError::InternalError(format!("unknown corpus '{key}'")))
    }

    fn stat_artifacts(&self, key: CorpusKey) -> ArtifactStat {
        let spec = CorpusSpec::for_key(key, &self.config);
        let csv_path = spec.chunk_csv_path();
        // Prefer the JSON artifact; fall back to the CSV one when only that
        // was written.
        let chunk_path = if !spec.chunk_path.exists() && csv_path.exists() {
            csv_path
        } else {
            spec.chunk_path.clone()
        };

        ArtifactStat {
            chunk_mtime: mtime(&chunk_path),
            sparse_mtime: mtime(&spec.sparse_path),
            chunk_path,
            sparse_path: spec.sparse_path,
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::sparse::TfidfVectorizer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(chunk_id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: chunk_id.to_string(),
            doc_id: "doc".to_string(),
            chunk_text: text.to_string(),
            source: "notices".to_string(),
            ..ChunkRecord::default()
        }
    }

    fn write_artifacts(config: &AppConfig, key: CorpusKey, records: &[ChunkRecord]) {
        let spec = CorpusSpec::for_key(key, config);
        ChunkRecord::write_json(&spec.chunk_path, records).expect("write chunks");
        let texts: Vec<String> = records.iter().map(|r| r.chunk_text.clone()).collect();
        let (vectorizer, matrix) = TfidfVectorizer::fit(&texts).expect("fit");
        SparseIndex { vectorizer, matrix }
            .save(&spec.sparse_path)
            .expect("save sparse");
    }

    fn test_config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig::for_tests(
            dir.path().join("data").to_str().expect("utf8"),
            dir.path().join("artifacts").to_str().expect("utf8"),
        )
    }

    #[tokio::test]
    async fn test_missing_artifacts_without_loader() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = DatasetCatalog::new(test_config(&dir), None);

        let result = catalog.ensure(CorpusKey::Notices).await;
        assert!(matches!(result, Err(AppError::DatasetMissing(_))));
    }

    #[tokio::test]
    async fn test_ensure_loads_and_caches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        write_artifacts(
            &config,
            CorpusKey::Notices,
            &[record("c1", "수강신청 안내"), record("c2", "장학금 공지")],
        );

        let catalog = DatasetCatalog::new(config, None);
        let first = catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert_eq!(first.len(), 2);
        assert_eq!(first.get("c2").map(|r| r.chunk_text.as_str()), Some("장학금 공지"));

        let second = catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert!(Arc::ptr_eq(&first, &second), "expected the cached entry");
    }

    #[tokio::test]
    async fn test_stat_change_triggers_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        write_artifacts(&config, CorpusKey::Notices, &[record("c1", "수강신청 안내")]);

        let catalog = DatasetCatalog::new(config.clone(), None);
        let first = catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert_eq!(first.len(), 1);

        // Rewrite artifacts with one more row; the mtime check must notice.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        write_artifacts(
            &config,
            CorpusKey::Notices,
            &[record("c1", "수강신청 안내"), record("c2", "장학금 공지")],
        );

        let reloaded = catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn test_misaligned_artifacts_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        let spec = CorpusSpec::for_key(CorpusKey::Notices, &config);

        ChunkRecord::write_json(
            &spec.chunk_path,
            &[record("c1", "수강신청"), record("c2", "장학금")],
        )
        .expect("write chunks");
        let (vectorizer, matrix) =
            TfidfVectorizer::fit(&["수강신청".to_string()]).expect("fit");
        SparseIndex { vectorizer, matrix }
            .save(&spec.sparse_path)
            .expect("save sparse");

        let catalog = DatasetCatalog::new(config, None);
        let result = catalog.ensure(CorpusKey::Notices).await;
        assert!(matches!(result, Err(AppError::InternalError(_))));
    }

    #[tokio::test]
    async fn test_incremental_append_keeps_alignment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        write_artifacts(
            &config,
            CorpusKey::Notices,
            &[record("c1", "수강신청 안내"), record("c2", "장학금 공지")],
        );

        let catalog = DatasetCatalog::new(config, None);
        catalog
            .append_incremental(CorpusKey::Notices, record("c3", "수강신청 추가 공지"))
            .await
            .expect("append");

        let entry = catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert_eq!(entry.chunks.len(), entry.sparse.matrix.len());
        assert_eq!(entry.by_id.get("c3"), Some(&2));
        assert_eq!(entry.chunks[2].chunk_id, "c3");

        // Known vocabulary from the appended text is searchable.
        let query = entry
            .sparse
            .vectorizer
            .transform(&["수강신청".to_string()]);
        let scores = entry
            .sparse
            .matrix
            .cosine_scores(query.row(0).expect("query row"));
        assert!(scores[2] > 0.0);

        // The artifacts on disk were not rewritten; counts reflect memory.
        let counts = catalog.counts().await;
        assert_eq!(counts.get(&CorpusKey::Notices), Some(&3));
        assert_eq!(counts.get(&CorpusKey::Rules), Some(&0));
    }

    struct WritingLoader {
        config: AppConfig,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DatasetLoader for WritingLoader {
        async fn ingest(&self, key: CorpusKey) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            write_artifacts(&self.config, key, &[record("c1", "수강신청 안내")]);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_artifacts_trigger_ingest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        let loader = Arc::new(WritingLoader {
            config: config.clone(),
            calls: AtomicUsize::new(0),
        });

        let catalog = DatasetCatalog::new(config, Some(loader.clone()));
        let entry = catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert_eq!(entry.len(), 1);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        // Cached afterwards; the loader is not consulted again.
        catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }
}
