use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::config::AppConfig;

/// The five curated corpora the service answers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusKey {
    Notices,
    Rules,
    Schedule,
    Courses,
    Staff,
}

impl CorpusKey {
    pub const ALL: [CorpusKey; 5] = [
        CorpusKey::Notices,
        CorpusKey::Rules,
        CorpusKey::Schedule,
        CorpusKey::Courses,
        CorpusKey::Staff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusKey::Notices => "notices",
            CorpusKey::Rules => "rules",
            CorpusKey::Schedule => "schedule",
            CorpusKey::Courses => "courses",
            CorpusKey::Staff => "staff",
        }
    }

    /// Vector collection backing this corpus.
    pub fn collection_name(&self) -> &'static str {
        match self {
            CorpusKey::Notices => "dongguk_notices",
            CorpusKey::Rules => "dongguk_rules",
            CorpusKey::Schedule => "dongguk_schedule",
            CorpusKey::Courses => "dongguk_courses",
            CorpusKey::Staff => "dongguk_staff",
        }
    }

    /// Nullable foreign-key column linking a chunk back to this corpus.
    pub fn parent_field(&self) -> &'static str {
        match self {
            CorpusKey::Notices => "notice_id",
            CorpusKey::Rules => "rule_id",
            CorpusKey::Schedule => "schedule_id",
            CorpusKey::Courses => "course_id",
            CorpusKey::Staff => "staff_id",
        }
    }

    /// Whether rows of this corpus carry a date usable by the date post-filter.
    pub fn has_date_field(&self) -> bool {
        matches!(
            self,
            CorpusKey::Notices | CorpusKey::Schedule | CorpusKey::Rules
        )
    }

    /// Only the course catalog supports the per-user major filter.
    pub fn has_major_field(&self) -> bool {
        matches!(self, CorpusKey::Courses)
    }

    /// One-line description fed to the LLM router.
    pub fn router_description(&self) -> &'static str {
        match self {
            CorpusKey::Notices => "교내 공지사항, 모집 안내, 장학금, 행사, 합격자 발표 등 게시판 공지",
            CorpusKey::Rules => "학칙, 학사 규정, 시행세칙 등 교내 규정 문서",
            CorpusKey::Schedule => "학사일정 (수강신청, 개강, 종강, 성적 처리, 등록 기간 등)",
            CorpusKey::Courses => "통계학과 교과목 정보, 과목 해설, 이수 구분과 선수과목",
            CorpusKey::Staff => "부서별 교직원 연락처, 담당 업무, 전화번호",
        }
    }
}

impl fmt::Display for CorpusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorpusKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notices" => Ok(CorpusKey::Notices),
            "rules" => Ok(CorpusKey::Rules),
            "schedule" => Ok(CorpusKey::Schedule),
            "courses" => Ok(CorpusKey::Courses),
            "staff" => Ok(CorpusKey::Staff),
            _ => Err(()),
        }
    }
}

/// Chunking parameters for one corpus: window size, overlap, title prefixing.
/// `size == None` keeps each document as a single chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub size: Option<usize>,
    pub overlap: usize,
    pub include_title: bool,
}

/// A corpus modeled as a value: collection, on-disk artifacts, chunking
/// behavior and filter capabilities. All pipeline code is parameterized by
/// this record rather than by per-corpus types.
#[derive(Debug, Clone)]
pub struct CorpusSpec {
    pub key: CorpusKey,
    pub collection: &'static str,
    pub source_path: PathBuf,
    pub chunk_path: PathBuf,
    pub sparse_path: PathBuf,
    pub chunk_params: ChunkParams,
}

impl CorpusSpec {
    pub fn for_key(key: CorpusKey, config: &AppConfig) -> Self {
        let data_dir = PathBuf::from(&config.data_dir);
        let artifact_dir = PathBuf::from(&config.artifact_dir);

        let source_path = match key {
            CorpusKey::Notices => data_dir.join("dongguk_notices.csv"),
            CorpusKey::Rules => data_dir.join("dongguk_rule_texts.csv"),
            CorpusKey::Schedule => data_dir.join("dongguk_schedule.csv"),
            // Courses merge two files; this is the description table, the
            // major-course table sits next to it (see `course_major_path`).
            CorpusKey::Courses => data_dir.join("dongguk_statistics_course_descriptions.csv"),
            CorpusKey::Staff => data_dir.join("dongguk_staff_contacts.csv"),
        };

        let chunk_params = match key {
            CorpusKey::Notices | CorpusKey::Rules => ChunkParams {
                size: Some(config.chunk_size),
                overlap: config.chunk_overlap,
                include_title: true,
            },
            CorpusKey::Schedule => ChunkParams {
                size: Some(config.chunk_size / 2),
                overlap: config.chunk_overlap / 2,
                include_title: true,
            },
            CorpusKey::Courses => ChunkParams {
                size: None,
                overlap: 0,
                include_title: true,
            },
            CorpusKey::Staff => ChunkParams {
                size: Some(config.chunk_size),
                overlap: 0,
                include_title: true,
            },
        };

        Self {
            key,
            collection: key.collection_name(),
            source_path,
            chunk_path: artifact_dir
                .join("chunks")
                .join(format!("{}.json", key.as_str())),
            sparse_path: artifact_dir
                .join("vectorizers")
                .join(format!("{}_tfidf.json", key.as_str())),
            chunk_params,
        }
    }

    /// Companion source for the courses corpus (major-course table).
    pub fn course_major_path(config: &AppConfig) -> PathBuf {
        PathBuf::from(&config.data_dir).join("dongguk_statistics_major_course.csv")
    }

    /// CSV fallback written when the JSON chunk file cannot be serialized.
    pub fn chunk_csv_path(&self) -> PathBuf {
        self.chunk_path.with_extension("csv")
    }
}
