//! Incremental notice sync: freshly crawled rows are diffed against the
//! relational store by detail URL, only the new ones are appended (source
//! CSV included, so later bulk ingests keep them), and the notices indices
//! are rebuilt from the database.

use std::collections::HashSet;

use tracing::{info, instrument};

use common::corpus::{CorpusKey, CorpusSpec};
use common::error::AppError;
use common::storage::types::chunk::Chunk;
use common::storage::types::notice::Notice;
use common::storage::types::RecordOrigin;
use common::utils::preprocess::{standardize_date, to_chunks};

use crate::builders::build_notice_docs;
use crate::pipeline::IngestionPipeline;
use crate::sources::{read_csv_table, CsvTable, Row};

const NOTICE_HEADERS: [&str; 8] = [
    "게시판",
    "제목",
    "카테고리",
    "게시일",
    "상단고정",
    "상세URL",
    "본문",
    "첨부파일",
];

/// Appends new crawled notices and refreshes the notices indices. Returns
/// how many notices were new.
#[instrument(skip_all)]
pub async fn sync_notices(
    pipeline: &IngestionPipeline,
    incoming: &CsvTable,
) -> Result<usize, AppError> {
    let existing: HashSet<String> = Notice::existing_detail_urls(pipeline.db())
        .await?
        .into_iter()
        .collect();

    let new_rows: Vec<&Row> = incoming
        .rows
        .iter()
        .filter(|row| {
            row.get("상세URL")
                .map(|url| !url.is_empty() && !existing.contains(url))
                .unwrap_or(false)
        })
        .collect();

    if new_rows.is_empty() {
        info!("No new notices to sync");
        return Ok(0);
    }

    let notices: Vec<Notice> = new_rows
        .iter()
        .map(|row| {
            let published = row
                .get("게시일")
                .and_then(|raw| standardize_date(raw))
                .unwrap_or_default();
            Notice::new(
                row.get("게시판").cloned().unwrap_or_default(),
                row.get("제목").cloned().unwrap_or_default(),
                row.get("카테고리").cloned().unwrap_or_default(),
                published,
                row.get("상단고정").cloned().unwrap_or_default(),
                row.get("상세URL").cloned().unwrap_or_default(),
                row.get("본문").cloned().unwrap_or_default(),
                row.get("첨부파일").cloned().unwrap_or_default(),
                RecordOrigin::Auto,
            )
        })
        .collect();

    for notice in &notices {
        pipeline.db().store_item(notice.clone()).await?;
    }
    info!(count = notices.len(), "Stored new notices");

    // Derive and store only the new chunks; bulk replacement is not wanted
    // here.
    let spec = pipeline.notices_spec();
    let docs = build_notice_docs(&notices);
    let params = spec.chunk_params;
    let records = to_chunks(&docs, params.size, params.overlap, params.include_title);
    for record in &records {
        if Chunk::chunk_id_exists(&record.chunk_id, pipeline.db()).await? {
            continue;
        }
        pipeline.db().store_item(Chunk::from_record(record)).await?;
    }

    append_rows_to_source_csv(&spec, incoming, &new_rows)?;

    // The DB now holds old + new chunks; rebuild the derived indices once.
    pipeline.reindex_corpus(CorpusKey::Notices).await?;

    Ok(notices.len())
}

/// Keeps the raw CSV in step with the database so a later bulk ingest does
/// not drop synced notices. New rows go on top; duplicates by detail URL are
/// removed.
fn append_rows_to_source_csv(
    spec: &CorpusSpec,
    incoming: &CsvTable,
    new_rows: &[&Row],
) -> Result<(), AppError> {
    let headers: Vec<String> = if incoming.headers.is_empty() {
        NOTICE_HEADERS.iter().map(|h| (*h).to_string()).collect()
    } else {
        incoming.headers.clone()
    };

    let existing_rows = if spec.source_path.exists() {
        read_csv_table(&spec.source_path)?.rows
    } else {
        Vec::new()
    };

    let mut seen = HashSet::new();
    let mut combined: Vec<Row> = Vec::new();
    for row in new_rows
        .iter()
        .map(|r| (*r).clone())
        .chain(existing_rows.into_iter())
    {
        let url = row.get("상세URL").cloned().unwrap_or_default();
        if url.is_empty() || seen.insert(url) {
            combined.push(row);
        }
    }

    if let Some(parent) = spec.source_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&spec.source_path)?;
    writer.write_record(&headers)?;
    for row in combined {
        let record: Vec<String> = headers
            .iter()
            .map(|h| row.get(h).cloned().unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

impl IngestionPipeline {
    fn notices_spec(&self) -> CorpusSpec {
        CorpusSpec::for_key(CorpusKey::Notices, self.config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use uuid::Uuid;

    use common::storage::db::SurrealDbClient;
    use common::utils::config::AppConfig;
    use common::utils::embedding::EmbeddingProvider;
    use common::vector::VectorCollection;

    fn table(rows: Vec<Vec<(&str, &str)>>) -> CsvTable {
        CsvTable {
            headers: NOTICE_HEADERS.iter().map(|h| (*h).to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|pairs| {
                    pairs
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect()
                })
                .collect(),
        }
    }

    fn notice_row<'a>(title: &'a str, url: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![
            ("게시판", "일반공지"),
            ("제목", title),
            ("카테고리", "학사"),
            ("게시일", "2025-11-10"),
            ("상단고정", "false"),
            ("상세URL", url),
            ("본문", "본문 내용입니다"),
            ("첨부파일", "[]"),
        ]
    }

    async fn pipeline_with_ingested_notices(
        dir: &tempfile::TempDir,
    ) -> IngestionPipeline {
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).expect("data dir");
        let config = AppConfig::for_tests(
            data_dir.to_str().expect("utf8"),
            dir.path().join("artifacts").to_str().expect("utf8"),
        );
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize");
        let embedder = Arc::new(EmbeddingProvider::hashed(config.embedding_dimensions));
        let pipeline = IngestionPipeline::new(db, embedder, config.clone());

        let spec = CorpusSpec::for_key(CorpusKey::Notices, &config);
        let mut file = std::fs::File::create(&spec.source_path).expect("create csv");
        writeln!(file, "게시판,제목,카테고리,게시일,상단고정,상세URL,본문,첨부파일").expect("write");
        writeln!(
            file,
            "일반공지,기존 공지,학사,2025-11-01,false,https://example.ac.kr/1,기존 본문,[]"
        )
        .expect("write");
        pipeline
            .ingest_corpus(CorpusKey::Notices)
            .await
            .expect("initial ingest");
        pipeline
    }

    #[tokio::test]
    async fn test_sync_appends_only_new_notices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline_with_ingested_notices(&dir).await;

        let incoming = table(vec![
            notice_row("기존 공지", "https://example.ac.kr/1"),
            notice_row("신규 공지", "https://example.ac.kr/2"),
        ]);

        let added = sync_notices(&pipeline, &incoming).await.expect("sync");
        assert_eq!(added, 1);

        let notices: Vec<Notice> = pipeline.db().get_all_stored_items().await.expect("notices");
        assert_eq!(notices.len(), 2);

        // Vector collection and relational chunks agree after the reindex.
        let spec = CorpusSpec::for_key(CorpusKey::Notices, pipeline.config());
        let collection =
            VectorCollection::new(pipeline.db().clone(), spec.collection).expect("collection");
        let vector_ids = collection.get_all_ids().await.expect("ids");
        let relational = Chunk::rows_for_corpus(CorpusKey::Notices, pipeline.db())
            .await
            .expect("rows");
        assert_eq!(vector_ids.len(), relational.len());

        // Source CSV was extended so a later bulk ingest keeps the notice.
        let csv = read_csv_table(&spec.source_path).expect("csv");
        assert_eq!(csv.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_with_no_new_rows_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline_with_ingested_notices(&dir).await;

        let incoming = table(vec![notice_row("기존 공지", "https://example.ac.kr/1")]);
        let added = sync_notices(&pipeline, &incoming).await.expect("sync");
        assert_eq!(added, 0);

        let notices: Vec<Notice> = pipeline.db().get_all_stored_items().await.expect("notices");
        assert_eq!(notices.len(), 1);
    }
}
