//! Bulk ingestion: reads raw sources, replaces the relational corpus
//! wholesale, derives chunks, and synchronizes the vector collection, the
//! sparse model, and the on-disk chunk table so all indices agree on the
//! chunk-id set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use common::corpus::{CorpusKey, CorpusSpec};
use common::error::AppError;
use common::sparse::{SparseIndex, TfidfVectorizer};
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk::{Chunk, ChunkRecord};
use common::storage::types::course::Course;
use common::storage::types::notice::Notice;
use common::storage::types::rule::Rule;
use common::storage::types::schedule::Schedule;
use common::storage::types::staff::Staff;
use common::storage::types::{RecordOrigin, StoredObject};
use common::utils::config::AppConfig;
use common::utils::embedding::EmbeddingProvider;
use common::utils::preprocess::to_chunks;
use common::vector::VectorCollection;

use retrieval_pipeline::cache::DatasetLoader;

use crate::builders::{
    build_course_docs, build_notice_docs, build_rule_docs, build_schedule_docs, build_staff_docs,
};
use crate::sources::{
    extract_department, first_nonempty, looks_like_phone, merge_courses, normalize_grade,
    read_csv_table, CsvTable,
};

const RULE_TEXT_CANDIDATES: [&str; 6] = ["text", "내용", "본문", "article", "조문", "rule_text"];
const RULE_NAME_CANDIDATES: [&str; 4] = ["filename", "파일명", "규정명", "title"];
const RULE_DIR_CANDIDATES: [&str; 3] = ["relative_dir", "경로", "folder"];

const SCHEDULE_START_CANDIDATES: [&str; 4] = ["start", "start_date", "시작", "시작일"];
const SCHEDULE_END_CANDIDATES: [&str; 4] = ["end", "end_date", "종료", "종료일"];
const SCHEDULE_CATEGORY_CANDIDATES: [&str; 5] = ["구분", "category", "분류", "0", "카테고리"];
const SCHEDULE_CONTENT_CANDIDATES: [&str; 5] = ["내용", "일정", "event", "2", "description"];
const SCHEDULE_DEPT_CANDIDATES: [&str; 3] = ["주관부서", "department", "부서"];

const COURSE_RECORD_TITLE_CANDIDATES: [&str; 5] =
    ["교과목명", "국문교과목명", "course_name", "title", "교과목"];

#[derive(Clone)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>, config: AppConfig) -> Self {
        Self {
            db,
            embedder,
            config,
        }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<EmbeddingProvider> {
        &self.embedder
    }

    /// Ingests every corpus in order. A failing corpus is logged and skipped
    /// so the others stay intact.
    pub async fn ingest_all(&self) -> Vec<(CorpusKey, Result<usize, AppError>)> {
        let mut results = Vec::new();
        for key in CorpusKey::ALL {
            let outcome = self.ingest_corpus(key).await.map(|records| records.len());
            if let Err(error) = &outcome {
                warn!(corpus = %key, %error, "Corpus ingest failed; continuing with the rest");
            }
            results.push((key, outcome));
        }
        results
    }

    #[instrument(skip(self), fields(corpus = %key))]
    pub async fn ingest_corpus(&self, key: CorpusKey) -> Result<Vec<ChunkRecord>, AppError> {
        let records = match key {
            CorpusKey::Notices => self.ingest_notices().await?,
            CorpusKey::Rules => self.ingest_rules().await?,
            CorpusKey::Schedule => self.ingest_schedule().await?,
            CorpusKey::Courses => self.ingest_courses().await?,
            CorpusKey::Staff => self.ingest_staff().await?,
        };
        info!(corpus = %key, chunks = records.len(), "Corpus ingested");
        Ok(records)
    }

    async fn ingest_notices(&self) -> Result<Vec<ChunkRecord>, AppError> {
        let spec = CorpusSpec::for_key(CorpusKey::Notices, &self.config);
        let table = self.read_source(&spec)?;

        let notices: Vec<Notice> = table
            .rows
            .iter()
            .map(|row| {
                let published = row
                    .get("게시일")
                    .and_then(|raw| common::utils::preprocess::standardize_date(raw))
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

        self.replace_corpus(CorpusKey::Notices, &notices).await?;

        let docs = build_notice_docs(&notices);
        let params = spec.chunk_params;
        let records = dedupe_by_chunk_id(to_chunks(
            &docs,
            params.size,
            params.overlap,
            params.include_title,
        ));

        self.store_chunk_rows(&records).await?;
        self.persist_chunks(&spec, &records).await?;
        Ok(records)
    }

    async fn ingest_rules(&self) -> Result<Vec<ChunkRecord>, AppError> {
        let spec = CorpusSpec::for_key(CorpusKey::Rules, &self.config);
        let table = self.read_source(&spec)?;

        let rules: Vec<Rule> = table
            .rows
            .iter()
            .map(|row| {
                Rule::new(
                    first_nonempty(row, &RULE_NAME_CANDIDATES),
                    first_nonempty(row, &RULE_DIR_CANDIDATES),
                    first_nonempty(row, &RULE_TEXT_CANDIDATES),
                )
            })
            .collect();

        self.replace_corpus(CorpusKey::Rules, &rules).await?;

        let docs = build_rule_docs(&rules);
        let params = spec.chunk_params;
        let records = dedupe_by_chunk_id(to_chunks(
            &docs,
            params.size,
            params.overlap,
            params.include_title,
        ));

        self.store_chunk_rows(&records).await?;
        self.persist_chunks(&spec, &records).await?;
        Ok(records)
    }

    async fn ingest_schedule(&self) -> Result<Vec<ChunkRecord>, AppError> {
        let spec = CorpusSpec::for_key(CorpusKey::Schedule, &self.config);
        let table = self.read_source(&spec)?;

        let mut schedules = Vec::new();
        for row in &table.rows {
            let description = first_nonempty(row, &SCHEDULE_CONTENT_CANDIDATES);
            if description.is_empty() {
                continue;
            }

            let (description, extracted) = extract_department(&description);
            let department =
                extracted.unwrap_or_else(|| first_nonempty(row, &SCHEDULE_DEPT_CANDIDATES));
            let title = description
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();

            schedules.push(Schedule::new(
                title,
                first_nonempty(row, &SCHEDULE_START_CANDIDATES),
                first_nonempty(row, &SCHEDULE_END_CANDIDATES),
                first_nonempty(row, &SCHEDULE_CATEGORY_CANDIDATES),
                department,
                description,
            ));
        }

        self.replace_corpus(CorpusKey::Schedule, &schedules).await?;

        let docs = build_schedule_docs(&schedules);
        let params = spec.chunk_params;
        let records = dedupe_by_chunk_id(to_chunks(
            &docs,
            params.size,
            params.overlap,
            params.include_title,
        ));

        self.store_chunk_rows(&records).await?;
        self.persist_chunks(&spec, &records).await?;
        Ok(records)
    }

    async fn ingest_courses(&self) -> Result<Vec<ChunkRecord>, AppError> {
        let spec = CorpusSpec::for_key(CorpusKey::Courses, &self.config);
        let major_path = CorpusSpec::course_major_path(&self.config);
        if !spec.source_path.exists() || !major_path.exists() {
            return Err(AppError::DatasetMissing(CorpusKey::Courses.to_string()));
        }

        let desc_table = read_csv_table(&spec.source_path)?;
        let major_table = read_csv_table(&major_path)?;
        let mut merged = merge_courses(&major_table, &desc_table, "학수번호");

        // Grade values like `학사3,4년` read badly; normalize for search.
        for row in &mut merged.rows {
            if let Some(grade) = row.get("이수대상").cloned() {
                row.insert("이수대상".to_string(), normalize_grade(&grade));
            }
        }

        let courses: Vec<Course> = merged
            .rows
            .iter()
            .map(|row| {
                let title = first_nonempty(row, &COURSE_RECORD_TITLE_CANDIDATES);
                let title = if title.is_empty() {
                    "통계학과 교과".to_string()
                } else {
                    title
                };
                let sorted: BTreeMap<&String, &String> = row.iter().collect();
                let raw_data = serde_json::to_string(&sorted).unwrap_or_default();
                Course::new(
                    row.get("학수번호").map(|s| s.trim().to_string()).unwrap_or_default(),
                    title,
                    row.get("해설").map(|s| s.trim().to_string()).unwrap_or_default(),
                    "combined_statistics".to_string(),
                    raw_data,
                    "통계학과".to_string(),
                )
            })
            .collect();

        self.replace_corpus(CorpusKey::Courses, &courses).await?;

        let docs = build_course_docs(&merged, &courses);
        let params = spec.chunk_params;
        let records = dedupe_by_chunk_id(to_chunks(
            &docs,
            params.size,
            params.overlap,
            params.include_title,
        ));

        self.store_chunk_rows(&records).await?;
        self.persist_chunks(&spec, &records).await?;
        Ok(records)
    }

    async fn ingest_staff(&self) -> Result<Vec<ChunkRecord>, AppError> {
        let spec = CorpusSpec::for_key(CorpusKey::Staff, &self.config);
        let table = self.read_source(&spec)?;

        let staff: Vec<Staff> = table
            .rows
            .iter()
            .map(|row| {
                let department = row.get("조직(트리)").cloned().unwrap_or_default();
                let mut name = String::new();
                let mut phone = String::new();
                for column in &table.headers {
                    if column == "조직(트리)" || column.starts_with("Unnamed") {
                        continue;
                    }
                    let value = row.get(column).map(|v| v.trim()).unwrap_or_default();
                    if value.is_empty() {
                        continue;
                    }
                    if looks_like_phone(value) {
                        if phone.is_empty() {
                            phone = value.to_string();
                        }
                    } else if name.is_empty() {
                        name = value.to_string();
                    }
                }
                let sorted: BTreeMap<&String, &String> = row.iter().collect();
                let raw_data = serde_json::to_string(&sorted).unwrap_or_default();
                Staff::new(department, name, phone, raw_data)
            })
            .collect();

        self.replace_corpus(CorpusKey::Staff, &staff).await?;

        let docs = build_staff_docs(&table, &staff);
        let params = spec.chunk_params;
        let records = dedupe_by_chunk_id(to_chunks(
            &docs,
            params.size,
            params.overlap,
            params.include_title,
        ));

        self.store_chunk_rows(&records).await?;
        self.persist_chunks(&spec, &records).await?;
        Ok(records)
    }

    /// Rebuilds every index of one corpus from the relational store. This is
    /// the operator remedy for `approved_but_unindexed` moderation rows and
    /// for sparse-model staleness after incremental appends.
    #[instrument(skip(self), fields(corpus = %key))]
    pub async fn reindex_corpus(&self, key: CorpusKey) -> Result<usize, AppError> {
        let spec = CorpusSpec::for_key(key, &self.config);
        let chunks = Chunk::rows_for_corpus(key, &self.db).await?;
        if chunks.is_empty() {
            warn!(corpus = %key, "No relational chunks to reindex");
            return Ok(0);
        }

        let records = match key {
            CorpusKey::Notices => {
                let parents: HashMap<String, Notice> = index_by_id(&self.db).await?;
                chunks
                    .iter()
                    .filter_map(|chunk| {
                        let parent = parents.get(chunk.notice_id.as_deref()?)?;
                        let mut record = base_record(chunk);
                        record.source = key.to_string();
                        record.title = parent.title.clone();
                        record.topics = parent.board.clone();
                        record.published_at = parent.published_date.clone();
                        record.url = parent.detail_url.clone();
                        record.attachments = parent.attachments.clone();
                        Some(record)
                    })
                    .collect::<Vec<_>>()
            }
            CorpusKey::Rules => {
                let parents: HashMap<String, Rule> = index_by_id(&self.db).await?;
                chunks
                    .iter()
                    .filter_map(|chunk| {
                        let parent = parents.get(chunk.rule_id.as_deref()?)?;
                        let mut record = base_record(chunk);
                        record.source = key.to_string();
                        record.title = parent.filename.clone();
                        record.topics = "규정".to_string();
                        Some(record)
                    })
                    .collect::<Vec<_>>()
            }
            CorpusKey::Schedule => {
                let parents: HashMap<String, Schedule> = index_by_id(&self.db).await?;
                chunks
                    .iter()
                    .filter_map(|chunk| {
                        let parent = parents.get(chunk.schedule_id.as_deref()?)?;
                        let mut record = base_record(chunk);
                        record.source = key.to_string();
                        record.title = parent.title.clone();
                        record.topics = if parent.category.is_empty() {
                            "schedule".to_string()
                        } else {
                            parent.category.clone()
                        };
                        record.published_at = parent.start_date.clone();
                        Some(record)
                    })
                    .collect::<Vec<_>>()
            }
            CorpusKey::Courses => {
                let parents: HashMap<String, Course> = index_by_id(&self.db).await?;
                chunks
                    .iter()
                    .filter_map(|chunk| {
                        let parent = parents.get(chunk.course_id.as_deref()?)?;
                        let mut record = base_record(chunk);
                        record.source = key.to_string();
                        record.title = parent.title.clone();
                        record.topics = parent.source_table.clone();
                        record.major = parent.major.clone();
                        Some(record)
                    })
                    .collect::<Vec<_>>()
            }
            CorpusKey::Staff => {
                let parents: HashMap<String, Staff> = index_by_id(&self.db).await?;
                chunks
                    .iter()
                    .filter_map(|chunk| {
                        let parent = parents.get(chunk.staff_id.as_deref()?)?;
                        let mut record = base_record(chunk);
                        record.source = key.to_string();
                        record.title = format!("{} - {}", parent.department, parent.name);
                        record.topics = parent.department.clone();
                        Some(record)
                    })
                    .collect::<Vec<_>>()
            }
        };

        let records = dedupe_by_chunk_id(records);
        self.persist_chunks(&spec, &records).await?;
        Ok(records.len())
    }

    fn read_source(&self, spec: &CorpusSpec) -> Result<CsvTable, AppError> {
        if !spec.source_path.exists() {
            return Err(AppError::DatasetMissing(spec.key.to_string()));
        }
        read_csv_table(&spec.source_path)
    }

    /// Deletes this corpus's chunks, then its source records, then inserts
    /// the fresh records, one logical replacement per bulk ingest.
    async fn replace_corpus<T>(&self, key: CorpusKey, records: &[T]) -> Result<(), AppError>
    where
        T: StoredObject + Clone + Send + Sync + 'static,
    {
        let response = self
            .db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "DELETE {} WHERE {} != NONE;",
                Chunk::table_name(),
                key.parent_field()
            ))
            .query(format!("DELETE {};", T::table_name()))
            .query("COMMIT TRANSACTION;")
            .await?;
        response.check()?;

        for record in records {
            self.db.store_item(record.clone()).await?;
        }
        Ok(())
    }

    async fn store_chunk_rows(&self, records: &[ChunkRecord]) -> Result<(), AppError> {
        for record in records {
            self.db.store_item(Chunk::from_record(record)).await?;
        }
        Ok(())
    }

    /// Embeds the chunk set, reconciles the vector collection against it
    /// (delete existing ∖ new, then upsert), persists the chunk file and the
    /// trained sparse model. After this call all three indices agree.
    pub async fn persist_chunks(
        &self,
        spec: &CorpusSpec,
        records: &[ChunkRecord],
    ) -> Result<(), AppError> {
        if records.is_empty() {
            warn!(corpus = %spec.key, "No chunks generated; skipping index build");
            return Ok(());
        }

        let texts: Vec<String> = records.iter().map(|r| r.chunk_text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let ids: Vec<String> = records.iter().map(|r| r.chunk_id.clone()).collect();
        let metadatas: Vec<serde_json::Value> =
            records.iter().map(ChunkRecord::metadata_value).collect();

        let collection = VectorCollection::new(self.db.clone(), spec.collection)?;
        collection.ensure_index(self.embedder.dimension()).await?;

        let existing: HashSet<String> = collection.get_all_ids().await?.into_iter().collect();
        let fresh: HashSet<String> = ids.iter().cloned().collect();
        let obsolete: Vec<String> = existing.difference(&fresh).cloned().collect();
        if !obsolete.is_empty() {
            info!(
                corpus = %spec.key,
                obsolete = obsolete.len(),
                "Deleting obsolete chunks from vector collection"
            );
            collection.delete(&obsolete).await?;
        }

        collection
            .upsert(&ids, &texts, &metadatas, &embeddings)
            .await?;

        if let Err(error) = ChunkRecord::write_json(&spec.chunk_path, records) {
            warn!(corpus = %spec.key, %error, "Chunk file serialization failed; falling back to CSV");
            ChunkRecord::write_csv(&spec.chunk_csv_path(), records)?;
        }

        let (vectorizer, matrix) = TfidfVectorizer::fit(&texts)?;
        SparseIndex { vectorizer, matrix }.save(&spec.sparse_path)?;

        Ok(())
    }
}

#[async_trait]
impl DatasetLoader for IngestionPipeline {
    async fn ingest(&self, key: CorpusKey) -> Result<(), AppError> {
        self.ingest_corpus(key).await.map(|_| ())
    }
}

fn base_record(chunk: &Chunk) -> ChunkRecord {
    let mut record = ChunkRecord {
        chunk_id: chunk.chunk_id.clone(),
        chunk_text: chunk.chunk_text.clone(),
        position: chunk.position,
        token_len: chunk.token_len,
        ..ChunkRecord::default()
    };
    record.notice_id = chunk.notice_id.clone();
    record.rule_id = chunk.rule_id.clone();
    record.schedule_id = chunk.schedule_id.clone();
    record.course_id = chunk.course_id.clone();
    record.staff_id = chunk.staff_id.clone();
    record
}

async fn index_by_id<T>(db: &SurrealDbClient) -> Result<HashMap<String, T>, AppError>
where
    T: StoredObject + Clone,
{
    let items: Vec<T> = db.get_all_stored_items().await?;
    Ok(items
        .into_iter()
        .map(|item| (item.get_id().to_string(), item))
        .collect())
}

fn dedupe_by_chunk_id(records: Vec<ChunkRecord>) -> Vec<ChunkRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.chunk_id.clone()))
        .collect()
}
