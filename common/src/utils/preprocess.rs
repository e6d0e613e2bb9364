//! Text cleanup and chunk preparation shared by every corpus builder.
//!
//! Ids are content-addressed: equal inputs always produce equal ids, which is
//! what makes re-ingestion and vector upserts idempotent.

use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::storage::types::chunk::{ChunkRecord, ParentRef};

#[allow(clippy::unwrap_used)]
mod patterns {
    use super::{LazyLock, Regex};

    pub static TAG_SCRIPT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<script.*?>.*?</script>").unwrap());
    pub static TAG_STYLE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<style.*?>.*?</style>").unwrap());
    pub static TAG_BREAK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<br\s*/?>").unwrap());
    pub static TAG_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)</p>").unwrap());
    pub static TAG_GENERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<.*?>").unwrap());

    pub static WHITESPACE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());
    pub static DIGIT_NL_HANGUL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d)\n([가-힣])").unwrap());
    pub static HANGUL_NL_DIGIT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"([가-힣])\n(\d)").unwrap());
    pub static NL_PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n([()])").unwrap());
    pub static PAREN_NL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([()])\n").unwrap());
    pub static NL_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n([.,!?·])").unwrap());
    pub static MULTI_NL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());
    pub static SPACED_PAREN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s*([()])\s*").unwrap());
    pub static SPACED_PUNCT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s*([.,!?·:/])\s*").unwrap());
    pub static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());
    pub static SPACED_QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+'|'\s+").unwrap());
    pub static SENTENCE_BREAK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"([.!?])\s+([가-힣A-Z0-9])").unwrap());
}

use patterns::*;

/// Removes script/style blocks, converts breaks and paragraph ends to
/// newlines, and drops the remaining tags.
pub fn strip_html(text: &str) -> String {
    let text = TAG_SCRIPT.replace_all(text, " ");
    let text = TAG_STYLE.replace_all(&text, " ");
    let text = TAG_BREAK.replace_all(&text, "\n");
    let text = TAG_PARAGRAPH.replace_all(&text, "\n");
    let text = TAG_GENERIC.replace_all(&text, " ");
    text.into_owned()
}

/// Replaces a lone newline (not part of a blank-line run) with a space.
fn join_single_newlines(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, c) in chars.iter().enumerate() {
        if *c == '\n' {
            let prev_nl = i > 0 && chars.get(i.wrapping_sub(1)) == Some(&'\n');
            let next_nl = chars.get(i + 1) == Some(&'\n');
            if !prev_nl && !next_nl {
                out.push(' ');
                continue;
            }
        }
        out.push(*c);
    }
    out
}

/// Whitespace normalization tuned for crawled Korean board content: joins
/// digit/hangul line breaks, strips spurious newlines around punctuation and
/// parentheses, condenses blank-line runs, and re-breaks after sentence-final
/// punctuation when a capital letter, digit, or hangul follows.
pub fn normalize_whitespace(text: &str) -> String {
    let text = WHITESPACE.replace_all(text, " ");
    let text = DIGIT_NL_HANGUL.replace_all(&text, "$1$2");
    let text = HANGUL_NL_DIGIT.replace_all(&text, "$1 $2");
    let text = NL_PAREN.replace_all(&text, "$1");
    let text = PAREN_NL.replace_all(&text, "$1");
    let text = NL_PUNCT.replace_all(&text, "$1");
    let text = join_single_newlines(&text);
    let text = MULTI_NL.replace_all(&text, "\n");
    let text = SPACED_PAREN.replace_all(&text, "$1");
    let text = SPACED_PUNCT.replace_all(&text, "$1 ");
    let text = MULTI_SPACE.replace_all(&text, " ");
    let text = SPACED_QUOTE.replace_all(&text, "'");
    let text = SENTENCE_BREAK.replace_all(&text, "$1\n$2");
    text.trim().to_string()
}

/// Canonicalizes a date string to `YYYY-MM-DD`; unparseable input yields
/// `None`.
pub fn standardize_date(value: &str) -> Option<String> {
    let value = value.trim();
    for pattern in ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%Y년 %m월 %d일"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, pattern) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

fn sha1_hex(raw: &str) -> String {
    let digest = Sha1::digest(raw.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Stable SHA-1 identifier built from the non-empty identifying parts.
pub fn make_doc_id(parts: &[&str]) -> String {
    let raw = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("|");
    sha1_hex(&raw)
}

/// Stable SHA-1 identifier for the `index`-th chunk of a document.
pub fn make_chunk_id(doc_id: &str, index: usize) -> String {
    sha1_hex(&format!("{doc_id}|{index}"))
}

/// Splits normalized text into character windows of `size` with the given
/// overlap. The step never drops below one character, and the last window is
/// the one that reaches the end of the text.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = normalize_whitespace(text);
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut segments = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        segments.push(chars.get(start..end).unwrap_or_default().iter().collect());
        if start + size >= chars.len() {
            break;
        }
        start += step;
    }
    segments
}

/// A source document ready for chunking, with the denormalized metadata that
/// travels onto each derived chunk.
#[derive(Debug, Clone, Default)]
pub struct DocSource {
    pub doc_id: String,
    pub title: String,
    pub text: String,
    pub source: String,
    pub topics: String,
    pub published_at: String,
    pub updated_at: String,
    pub url: String,
    pub major: String,
    pub attachments: String,
    pub parent: Option<ParentRef>,
}

/// Turns documents into chunk rows. With `chunk_size = None` every document
/// becomes a single chunk; otherwise the character window applies. When
/// `include_title` is set and a title exists, each chunk body is prefixed
/// with `[title]`.
pub fn to_chunks(
    docs: &[DocSource],
    chunk_size: Option<usize>,
    chunk_overlap: usize,
    include_title: bool,
) -> Vec<ChunkRecord> {
    let mut chunks = Vec::new();
    for doc in docs {
        let segments = match chunk_size {
            Some(size) => {
                let windows = chunk_text(&doc.text, size, chunk_overlap);
                if windows.is_empty() {
                    vec![doc.text.clone()]
                } else {
                    windows
                }
            }
            None => vec![doc.text.clone()],
        };

        for (idx, segment) in segments.into_iter().enumerate() {
            let body = if include_title && !doc.title.is_empty() {
                format!("[{}]\n\n{}", doc.title, segment).trim().to_string()
            } else {
                segment.trim().to_string()
            };

            let mut record = ChunkRecord {
                chunk_id: make_chunk_id(&doc.doc_id, idx),
                doc_id: doc.doc_id.clone(),
                chunk_text: body.clone(),
                position: idx,
                token_len: body.split_whitespace().count(),
                source: doc.source.clone(),
                title: doc.title.clone(),
                topics: doc.topics.clone(),
                published_at: doc.published_at.clone(),
                updated_at: doc.updated_at.clone(),
                url: doc.url.clone(),
                major: doc.major.clone(),
                attachments: doc.attachments.clone(),
                ..ChunkRecord::default()
            };
            record.set_parent(doc.parent.clone());
            chunks.push(record);
        }
    }
    chunks
}
