use std::fs;
use std::path::Path;

use crate::corpus::CorpusKey;
use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::stored_object;
use uuid::Uuid;

stored_object!(Chunk, "chunks", {
    chunk_id: String,
    chunk_text: String,
    position: usize,
    token_len: usize,
    notice_id: Option<String>,
    rule_id: Option<String>,
    schedule_id: Option<String>,
    course_id: Option<String>,
    staff_id: Option<String>
});

/// Owning reference from a chunk to its single parent source record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentRef {
    Notice(String),
    Rule(String),
    Schedule(String),
    Course(String),
    Staff(String),
}

impl ParentRef {
    pub fn corpus(&self) -> CorpusKey {
        match self {
            ParentRef::Notice(_) => CorpusKey::Notices,
            ParentRef::Rule(_) => CorpusKey::Rules,
            ParentRef::Schedule(_) => CorpusKey::Schedule,
            ParentRef::Course(_) => CorpusKey::Courses,
            ParentRef::Staff(_) => CorpusKey::Staff,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ParentRef::Notice(id)
            | ParentRef::Rule(id)
            | ParentRef::Schedule(id)
            | ParentRef::Course(id)
            | ParentRef::Staff(id) => id,
        }
    }
}

impl Chunk {
    pub fn from_record(record: &ChunkRecord) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chunk_id: record.chunk_id.clone(),
            chunk_text: record.chunk_text.clone(),
            position: record.position,
            token_len: record.token_len,
            notice_id: record.notice_id.clone(),
            rule_id: record.rule_id.clone(),
            schedule_id: record.schedule_id.clone(),
            course_id: record.course_id.clone(),
            staff_id: record.staff_id.clone(),
        }
    }

    /// Deletes every chunk whose parent belongs to the given corpus.
    pub async fn delete_for_corpus(
        corpus: CorpusKey,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let query = format!(
            "DELETE {} WHERE {} != NONE",
            Self::table_name(),
            corpus.parent_field()
        );
        db.client.query(query).await?;

        Ok(())
    }

    /// Fetches the relational chunk rows of one corpus.
    pub async fn rows_for_corpus(
        corpus: CorpusKey,
        db: &SurrealDbClient,
    ) -> Result<Vec<Chunk>, AppError> {
        let query = format!(
            "SELECT * FROM {} WHERE {} != NONE",
            Self::table_name(),
            corpus.parent_field()
        );
        let rows: Vec<Chunk> = db.client.query(query).await?.take(0)?;
        Ok(rows)
    }

    /// True when a chunk row with this content-addressed id already exists.
    pub async fn chunk_id_exists(chunk_id: &str, db: &SurrealDbClient) -> Result<bool, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT VALUE chunk_id FROM {} WHERE chunk_id = $chunk_id LIMIT 1",
                Self::table_name()
            ))
            .bind(("chunk_id", chunk_id.to_string()))
            .await?;
        let found: Vec<String> = response.take(0)?;
        Ok(!found.is_empty())
    }
}

/// Denormalized chunk row: the unit the dataset cache holds in memory, the
/// chunk file persists, and the vector store carries as metadata. Empty
/// strings mark absent metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_text: String,
    #[serde(default)]
    pub position: usize,
    #[serde(default)]
    pub token_len: usize,
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub topics: String,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub major: String,
    #[serde(default)]
    pub attachments: String,
    #[serde(default)]
    pub notice_id: Option<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub staff_id: Option<String>,
}

impl ChunkRecord {
    pub fn set_parent(&mut self, parent: Option<ParentRef>) {
        self.notice_id = None;
        self.rule_id = None;
        self.schedule_id = None;
        self.course_id = None;
        self.staff_id = None;
        match parent {
            Some(ParentRef::Notice(id)) => self.notice_id = Some(id),
            Some(ParentRef::Rule(id)) => self.rule_id = Some(id),
            Some(ParentRef::Schedule(id)) => self.schedule_id = Some(id),
            Some(ParentRef::Course(id)) => self.course_id = Some(id),
            Some(ParentRef::Staff(id)) => self.staff_id = Some(id),
            None => {}
        }
    }

    pub fn parent(&self) -> Option<ParentRef> {
        if let Some(id) = &self.notice_id {
            return Some(ParentRef::Notice(id.clone()));
        }
        if let Some(id) = &self.rule_id {
            return Some(ParentRef::Rule(id.clone()));
        }
        if let Some(id) = &self.schedule_id {
            return Some(ParentRef::Schedule(id.clone()));
        }
        if let Some(id) = &self.course_id {
            return Some(ParentRef::Course(id.clone()));
        }
        if let Some(id) = &self.staff_id {
            return Some(ParentRef::Staff(id.clone()));
        }
        None
    }

    /// Metadata projection stored next to the embedding: every column except
    /// the chunk text itself.
    pub fn metadata_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("chunk_text");
        }
        value
    }

    /// Writes chunk rows as JSON; caller falls back to CSV on failure.
    pub fn write_json(path: &Path, records: &[ChunkRecord]) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string(records)?;
        fs::write(path, payload)?;
        Ok(())
    }

    /// CSV fallback for environments where the JSON artifact cannot be
    /// produced.
    pub fn write_csv(path: &Path, records: &[ChunkRecord]) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a chunk file, dispatching on the extension written at ingest
    /// time.
    pub fn read_file(path: &Path) -> Result<Vec<ChunkRecord>, AppError> {
        if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            let mut reader = csv::Reader::from_path(path)?;
            let mut records = Vec::new();
            for row in reader.deserialize() {
                records.push(row?);
            }
            Ok(records)
        } else {
            let payload = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&payload)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(chunk_id: &str, parent: ParentRef) -> ChunkRecord {
        let mut record = ChunkRecord {
            chunk_id: chunk_id.to_string(),
            doc_id: "doc".to_string(),
            chunk_text: "본문 내용".to_string(),
            source: parent.corpus().as_str().to_string(),
            title: "제목".to_string(),
            ..ChunkRecord::default()
        };
        record.set_parent(Some(parent));
        record
    }

    #[test]
    fn test_parent_is_exclusive() {
        let mut record = sample_record("c1", ParentRef::Notice("n1".to_string()));
        assert_eq!(record.parent(), Some(ParentRef::Notice("n1".to_string())));

        record.set_parent(Some(ParentRef::Course("co1".to_string())));
        assert!(record.notice_id.is_none());
        assert_eq!(record.parent(), Some(ParentRef::Course("co1".to_string())));
    }

    #[test]
    fn test_metadata_excludes_chunk_text() {
        let record = sample_record("c1", ParentRef::Rule("r1".to_string()));
        let metadata = record.metadata_value();
        assert!(metadata.get("chunk_text").is_none());
        assert_eq!(
            metadata.get("title").and_then(|v| v.as_str()),
            Some("제목")
        );
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks").join("notices.json");
        let records = vec![
            sample_record("c1", ParentRef::Notice("n1".to_string())),
            sample_record("c2", ParentRef::Notice("n2".to_string())),
        ];

        ChunkRecord::write_json(&path, &records).expect("write json");
        let loaded = ChunkRecord::read_file(&path).expect("read json");
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_csv_fallback_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notices.csv");
        let records = vec![sample_record("c1", ParentRef::Staff("s1".to_string()))];

        ChunkRecord::write_csv(&path, &records).expect("write csv");
        let loaded = ChunkRecord::read_file(&path).expect("read csv");
        assert_eq!(loaded[0].chunk_id, records[0].chunk_id);
        assert_eq!(loaded[0].staff_id, records[0].staff_id);
    }

    #[tokio::test]
    async fn test_delete_for_corpus_only_touches_that_corpus() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let notice_chunk = Chunk::from_record(&sample_record(
            "chunk-notice",
            ParentRef::Notice("n1".to_string()),
        ));
        let rule_chunk =
            Chunk::from_record(&sample_record("chunk-rule", ParentRef::Rule("r1".to_string())));

        db.store_item(notice_chunk).await.expect("store notice chunk");
        db.store_item(rule_chunk).await.expect("store rule chunk");

        Chunk::delete_for_corpus(CorpusKey::Notices, &db)
            .await
            .expect("delete notices chunks");

        let notices = Chunk::rows_for_corpus(CorpusKey::Notices, &db)
            .await
            .expect("rows for notices");
        let rules = Chunk::rows_for_corpus(CorpusKey::Rules, &db)
            .await
            .expect("rows for rules");
        assert!(notices.is_empty());
        assert_eq!(rules.len(), 1);

        assert!(Chunk::chunk_id_exists("chunk-rule", &db).await.expect("exists"));
        assert!(!Chunk::chunk_id_exists("chunk-notice", &db).await.expect("exists"));
    }
}
