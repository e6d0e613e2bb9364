//! Admin moderation path: queued submissions become notice records and live
//! index entries on approval, with an online incremental update instead of a
//! full re-ingest.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use common::corpus::CorpusKey;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk::{Chunk, ChunkRecord, ParentRef};
use common::storage::types::custom_knowledge::CustomKnowledge;
use common::storage::types::notice::Notice;
use common::storage::types::pending_item::{PendingItem, PendingStatus};
use common::storage::types::{RecordOrigin, StoredObject};
use common::utils::preprocess::make_doc_id;
use common::utils::embedding::EmbeddingProvider;
use common::vector::VectorCollection;

use retrieval_pipeline::cache::DatasetCatalog;

/// Result of an approval: the final queue status plus the chunk id when the
/// item was indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub status: PendingStatus,
    pub chunk_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnnouncementPayload {
    title: String,
    content: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    department: String,
    #[serde(default)]
    category: String,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    start_date: String,
    #[serde(default)]
    end_date: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    department: String,
}

#[derive(Debug, Deserialize)]
struct CustomKnowledgePayload {
    question: String,
    answer: String,
    #[serde(default)]
    category: String,
}

/// Queues a submission for review.
pub async fn submit(
    db: &SurrealDbClient,
    source_type: &str,
    data: &str,
) -> Result<PendingItem, AppError> {
    let item = PendingItem::new(source_type.to_string(), data.to_string());
    db.store_item(item.clone()).await?;
    info!(id = %item.id, source_type, "Pending item submitted");
    Ok(item)
}

/// Marks an item rejected; no index side effects.
pub async fn reject(db: &SurrealDbClient, item_id: &str) -> Result<(), AppError> {
    PendingItem::set_status(item_id, PendingStatus::Rejected, db).await
}

/// Projects the payload into a notice, writes the relational rows, upserts
/// the embedding, and extends the live notices dataset. The relational
/// write and the index write succeed or fail as one: an index failure rolls
/// the rows back and parks the item as `approved_but_unindexed`.
#[instrument(skip_all, fields(item_id))]
pub async fn approve(
    db: &Arc<SurrealDbClient>,
    embedder: &Arc<EmbeddingProvider>,
    catalog: &DatasetCatalog,
    item_id: &str,
    today: NaiveDate,
) -> Result<ApprovalOutcome, AppError> {
    let item: PendingItem = db
        .get_item(item_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("pending item '{item_id}'")))?;
    if item.status != PendingStatus::Pending {
        return Err(AppError::Validation(format!(
            "pending item '{item_id}' is not pending"
        )));
    }

    let (notice, knowledge) = match project_payload(&item, today) {
        Ok(Some(projection)) => projection,
        Ok(None) => {
            // Unknown submission type: approve for manual handling, no
            // index side effect.
            PendingItem::set_status(item_id, PendingStatus::ApprovedManually, db).await?;
            return Ok(ApprovalOutcome {
                status: PendingStatus::ApprovedManually,
                chunk_id: None,
            });
        }
        Err(error) => return Err(error),
    };

    // Content-addressed id; collisions get a short random suffix so both
    // rows survive.
    let mut chunk_id = make_doc_id(&[&notice.title, &notice.board, &notice.published_date]);
    if Chunk::chunk_id_exists(&chunk_id, db).await? {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        warn!(%chunk_id, "Chunk id collision; appending suffix");
        chunk_id = format!("{chunk_id}_{suffix}");
    }

    let chunk_text = prefixed_chunk_text(&notice);
    let record = chunk_record(&notice, &chunk_id, &chunk_text);
    let chunk_row = Chunk::from_record(&record);

    store_relational(db, &notice, &chunk_row, knowledge.as_ref()).await?;

    // Index side: embedding + vector upsert. Failure here must not leave a
    // chunk row whose embedding was never written.
    let indexed = index_notice(db, embedder, &record).await;
    if let Err(index_error) = indexed {
        error!(%index_error, "Vector upsert failed; rolling back relational rows");
        rollback_relational(db, &notice, &chunk_row, knowledge.as_ref()).await;
        PendingItem::set_status(item_id, PendingStatus::ApprovedButUnindexed, db).await?;
        return Err(AppError::IndexInconsistent(index_error.to_string()));
    }

    // Extend the live dataset without a reload; on failure the next full
    // reindex reconciles, so the approval itself still stands.
    if let Err(cache_error) = catalog
        .append_incremental(CorpusKey::Notices, record.clone())
        .await
    {
        warn!(%cache_error, "Incremental dataset update failed; reindex will reconcile");
    }

    PendingItem::set_status(item_id, PendingStatus::Approved, db).await?;
    info!(%chunk_id, "Pending item approved and indexed");
    Ok(ApprovalOutcome {
        status: PendingStatus::Approved,
        chunk_id: Some(chunk_id),
    })
}

/// Maps a queue item onto a notice record; unknown types yield `None`.
fn project_payload(
    item: &PendingItem,
    today: NaiveDate,
) -> Result<Option<(Notice, Option<CustomKnowledge>)>, AppError> {
    match item.source_type.as_str() {
        "announcement" => {
            let payload: AnnouncementPayload = parse_payload(&item.data)?;
            let board = default_if_empty(payload.department, "공지사항");
            let category = default_if_empty(payload.category, "일반");
            Ok(Some((
                Notice::new(
                    board,
                    payload.title,
                    category,
                    payload.date,
                    String::new(),
                    String::new(),
                    payload.content,
                    String::new(),
                    RecordOrigin::Manual,
                ),
                None,
            )))
        }
        "event" => {
            let payload: EventPayload = parse_payload(&item.data)?;

            let mut content_parts = Vec::new();
            if !payload.description.is_empty() {
                content_parts.push(payload.description.clone());
            }
            let mut date_line = format!("일시: {}", payload.start_date);
            if !payload.end_date.is_empty() && payload.end_date != payload.start_date {
                date_line.push_str(&format!(" ~ {}", payload.end_date));
            }
            content_parts.push(date_line);
            if !payload.location.is_empty() {
                content_parts.push(format!("장소: {}", payload.location));
            }

            let board = default_if_empty(payload.department, "학과행사");
            Ok(Some((
                Notice::new(
                    board,
                    payload.title,
                    "행사".to_string(),
                    payload.start_date,
                    String::new(),
                    String::new(),
                    content_parts.join("\n\n"),
                    String::new(),
                    RecordOrigin::Manual,
                ),
                None,
            )))
        }
        "custom_knowledge" => {
            let payload: CustomKnowledgePayload = parse_payload(&item.data)?;
            let board = default_if_empty(payload.category.clone(), "기타");
            let notice = Notice::new(
                board,
                payload.question.clone(),
                "FAQ".to_string(),
                today.format("%Y-%m-%d").to_string(),
                String::new(),
                String::new(),
                payload.answer.clone(),
                String::new(),
                RecordOrigin::Manual,
            );
            let knowledge =
                CustomKnowledge::new(payload.question, payload.answer, payload.category);
            Ok(Some((notice, Some(knowledge))))
        }
        _ => Ok(None),
    }
}

fn parse_payload<'a, T: Deserialize<'a>>(data: &'a str) -> Result<T, AppError> {
    serde_json::from_str(data)
        .map_err(|e| AppError::Validation(format!("malformed admin payload: {e}")))
}

fn default_if_empty(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Chunk body for approved items: provenance header plus the content.
fn prefixed_chunk_text(notice: &Notice) -> String {
    let mut prefix_parts = Vec::new();
    if !notice.board.is_empty() {
        prefix_parts.push(format!("게시판: {}", notice.board));
    }
    if !notice.category.is_empty() {
        prefix_parts.push(format!("분류: {}", notice.category));
    }
    if !notice.published_date.is_empty() {
        prefix_parts.push(format!("게시일: {}", notice.published_date));
    }

    if prefix_parts.is_empty() {
        notice.content.clone()
    } else {
        format!("[{}]\n\n{}", prefix_parts.join(", "), notice.content)
    }
}

fn chunk_record(notice: &Notice, chunk_id: &str, chunk_text: &str) -> ChunkRecord {
    let mut record = ChunkRecord {
        chunk_id: chunk_id.to_string(),
        chunk_text: chunk_text.to_string(),
        token_len: chunk_text.split_whitespace().count(),
        source: CorpusKey::Notices.to_string(),
        title: notice.title.clone(),
        topics: notice.board.clone(),
        published_at: notice.published_date.clone(),
        ..ChunkRecord::default()
    };
    record.set_parent(Some(ParentRef::Notice(notice.id.clone())));
    record
}

/// Inserts the notice, its chunk, and (for custom Q&A) the knowledge row in
/// one transaction.
async fn store_relational(
    db: &SurrealDbClient,
    notice: &Notice,
    chunk: &Chunk,
    knowledge: Option<&CustomKnowledge>,
) -> Result<(), AppError> {
    let mut query = db
        .client
        .query("BEGIN TRANSACTION;")
        .query(format!(
            "CREATE type::thing('{}', $notice_id) CONTENT $notice;",
            Notice::table_name()
        ))
        .query(format!(
            "CREATE type::thing('{}', $chunk_row_id) CONTENT $chunk;",
            Chunk::table_name()
        ))
        .bind(("notice_id", notice.id.clone()))
        .bind(("notice", notice.clone()))
        .bind(("chunk_row_id", chunk.id.clone()))
        .bind(("chunk", chunk.clone()));

    if let Some(knowledge) = knowledge {
        query = query
            .query(format!(
                "CREATE type::thing('{}', $knowledge_id) CONTENT $knowledge;",
                CustomKnowledge::table_name()
            ))
            .bind(("knowledge_id", knowledge.id.clone()))
            .bind(("knowledge", knowledge.clone()));
    }

    let response = query.query("COMMIT TRANSACTION;").await?;
    response.check()?;
    Ok(())
}

/// Compensating delete after an index failure. Best effort: failures here
/// are logged, not surfaced over the original error.
async fn rollback_relational(
    db: &SurrealDbClient,
    notice: &Notice,
    chunk: &Chunk,
    knowledge: Option<&CustomKnowledge>,
) {
    if let Err(e) = db.delete_item::<Chunk>(&chunk.id).await {
        error!(%e, "Rollback failed to delete chunk row");
    }
    if let Err(e) = db.delete_item::<Notice>(&notice.id).await {
        error!(%e, "Rollback failed to delete notice row");
    }
    if let Some(knowledge) = knowledge {
        if let Err(e) = db.delete_item::<CustomKnowledge>(&knowledge.id).await {
            error!(%e, "Rollback failed to delete custom knowledge row");
        }
    }
}

async fn index_notice(
    db: &Arc<SurrealDbClient>,
    embedder: &Arc<EmbeddingProvider>,
    record: &ChunkRecord,
) -> Result<(), AppError> {
    let embedding = embedder.embed(&record.chunk_text).await?;
    let collection = VectorCollection::new(db.clone(), CorpusKey::Notices.collection_name())?;
    collection
        .upsert(
            &[record.chunk_id.clone()],
            &[record.chunk_text.clone()],
            &[record.metadata_value()],
            &[embedding],
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::corpus::CorpusSpec;
    use common::sparse::{SparseIndex, TfidfVectorizer};
    use common::utils::config::AppConfig;

    struct Harness {
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        catalog: DatasetCatalog,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::for_tests(
            dir.path().join("data").to_str().expect("utf8"),
            dir.path().join("artifacts").to_str().expect("utf8"),
        );

        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize");

        let embedder = Arc::new(EmbeddingProvider::hashed(config.embedding_dimensions));

        // Seed notices artifacts so the incremental append has a dataset.
        let seed = ChunkRecord {
            chunk_id: "seed".to_string(),
            chunk_text: "기존 공지 본문".to_string(),
            source: "notices".to_string(),
            ..ChunkRecord::default()
        };
        let spec = CorpusSpec::for_key(CorpusKey::Notices, &config);
        ChunkRecord::write_json(&spec.chunk_path, std::slice::from_ref(&seed))
            .expect("write chunks");
        let (vectorizer, matrix) =
            TfidfVectorizer::fit(&["기존 공지 본문".to_string()]).expect("fit");
        SparseIndex { vectorizer, matrix }
            .save(&spec.sparse_path)
            .expect("save sparse");

        let collection =
            VectorCollection::new(db.clone(), CorpusKey::Notices.collection_name())
                .expect("collection");
        collection
            .ensure_index(embedder.dimension())
            .await
            .expect("index");

        let catalog = DatasetCatalog::new(config, None);
        Harness {
            db,
            embedder,
            catalog,
            _dir: dir,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 10).expect("date")
    }

    #[tokio::test]
    async fn test_approve_announcement_end_to_end() {
        let h = harness().await;

        let item = submit(
            &h.db,
            "announcement",
            r#"{"title":"T","content":"C","date":"2025-11-10","department":"X","category":"일반"}"#,
        )
        .await
        .expect("submit");

        let outcome = approve(&h.db, &h.embedder, &h.catalog, &item.id, today())
            .await
            .expect("approve");

        assert_eq!(outcome.status, PendingStatus::Approved);
        let chunk_id = outcome.chunk_id.expect("chunk id");
        // Content-addressed: SHA1("T|X|2025-11-10").
        assert_eq!(chunk_id, make_doc_id(&["T", "X", "2025-11-10"]));

        // Relational row, vector row, and in-memory dataset all carry it.
        assert!(Chunk::chunk_id_exists(&chunk_id, &h.db).await.expect("exists"));
        let collection =
            VectorCollection::new(h.db.clone(), CorpusKey::Notices.collection_name())
                .expect("collection");
        assert!(collection
            .get_all_ids()
            .await
            .expect("ids")
            .contains(&chunk_id));
        let entry = h.catalog.ensure(CorpusKey::Notices).await.expect("ensure");
        assert!(entry.get(&chunk_id).is_some());
        assert_eq!(entry.chunks.len(), entry.sparse.matrix.len());

        let stored: PendingItem = h.db.get_item(&item.id).await.expect("get").expect("item");
        assert_eq!(stored.status, PendingStatus::Approved);
    }

    #[tokio::test]
    async fn test_approve_collision_appends_suffix() {
        let h = harness().await;
        let payload =
            r#"{"title":"T","content":"C","date":"2025-11-10","department":"X","category":"일반"}"#;

        let first = submit(&h.db, "announcement", payload).await.expect("submit");
        let second = submit(&h.db, "announcement", payload).await.expect("submit");

        let first_outcome = approve(&h.db, &h.embedder, &h.catalog, &first.id, today())
            .await
            .expect("approve first");
        let second_outcome = approve(&h.db, &h.embedder, &h.catalog, &second.id, today())
            .await
            .expect("approve second");

        let base = make_doc_id(&["T", "X", "2025-11-10"]);
        let first_id = first_outcome.chunk_id.expect("first id");
        let second_id = second_outcome.chunk_id.expect("second id");
        assert_eq!(first_id, base);
        assert!(second_id.starts_with(&format!("{base}_")));
        assert_eq!(second_id.len(), base.len() + 9);

        let collection =
            VectorCollection::new(h.db.clone(), CorpusKey::Notices.collection_name())
                .expect("collection");
        let ids = collection.get_all_ids().await.expect("ids");
        assert!(ids.contains(&first_id));
        assert!(ids.contains(&second_id));
    }

    #[tokio::test]
    async fn test_approve_event_projects_into_notices() {
        let h = harness().await;

        let item = submit(
            &h.db,
            "event",
            r#"{"title":"축제","description":"동아리 공연","start_date":"2025-11-20","end_date":"2025-11-21","location":"대운동장","department":"총학생회"}"#,
        )
        .await
        .expect("submit");

        let outcome = approve(&h.db, &h.embedder, &h.catalog, &item.id, today())
            .await
            .expect("approve");
        assert_eq!(outcome.status, PendingStatus::Approved);

        let notices: Vec<Notice> = h.db.get_all_stored_items().await.expect("notices");
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].category, "행사");
        assert_eq!(notices[0].published_date, "2025-11-20");
        assert!(notices[0].content.contains("일시: 2025-11-20 ~ 2025-11-21"));
        assert!(notices[0].content.contains("장소: 대운동장"));
        assert_eq!(notices[0].origin, RecordOrigin::Manual);
    }

    #[tokio::test]
    async fn test_approve_custom_knowledge_writes_faq_and_knowledge_row() {
        let h = harness().await;

        let item = submit(
            &h.db,
            "custom_knowledge",
            r#"{"question":"셔틀버스 시간표","answer":"9시부터 20분 간격","category":"학과정보"}"#,
        )
        .await
        .expect("submit");

        let outcome = approve(&h.db, &h.embedder, &h.catalog, &item.id, today())
            .await
            .expect("approve");
        assert_eq!(outcome.status, PendingStatus::Approved);

        let notices: Vec<Notice> = h.db.get_all_stored_items().await.expect("notices");
        assert_eq!(notices[0].category, "FAQ");
        assert_eq!(notices[0].published_date, "2025-11-10");

        let knowledge: Vec<CustomKnowledge> =
            h.db.get_all_stored_items().await.expect("knowledge");
        assert_eq!(knowledge.len(), 1);
        assert_eq!(knowledge[0].question, "셔틀버스 시간표");
    }

    #[tokio::test]
    async fn test_approve_unknown_type_is_manual() {
        let h = harness().await;
        let item = submit(&h.db, "poster", r#"{"anything":"goes"}"#)
            .await
            .expect("submit");

        let outcome = approve(&h.db, &h.embedder, &h.catalog, &item.id, today())
            .await
            .expect("approve");
        assert_eq!(outcome.status, PendingStatus::ApprovedManually);
        assert!(outcome.chunk_id.is_none());

        let notices: Vec<Notice> = h.db.get_all_stored_items().await.expect("notices");
        assert!(notices.is_empty());
    }

    #[tokio::test]
    async fn test_approve_malformed_payload_is_validation_error() {
        let h = harness().await;
        let item = submit(&h.db, "announcement", "not json").await.expect("submit");

        let result = approve(&h.db, &h.embedder, &h.catalog, &item.id, today()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reject_sets_status_without_side_effects() {
        let h = harness().await;
        let item = submit(&h.db, "announcement", r#"{"title":"T","content":"C"}"#)
            .await
            .expect("submit");

        reject(&h.db, &item.id).await.expect("reject");

        let stored: PendingItem = h.db.get_item(&item.id).await.expect("get").expect("item");
        assert_eq!(stored.status, PendingStatus::Rejected);
        let notices: Vec<Notice> = h.db.get_all_stored_items().await.expect("notices");
        assert!(notices.is_empty());
    }

    #[tokio::test]
    async fn test_approve_requires_pending_status() {
        let h = harness().await;
        let item = submit(&h.db, "announcement", r#"{"title":"T","content":"C"}"#)
            .await
            .expect("submit");
        reject(&h.db, &item.id).await.expect("reject");

        let result = approve(&h.db, &h.embedder, &h.catalog, &item.id, today()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
