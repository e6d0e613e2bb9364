//! Raw source readers. Crawled corpora arrive as CSV files with Korean
//! headers; rows are kept as ordered header/value tables so builders can
//! apply the per-corpus column heuristics the crawlers cannot guarantee.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use common::error::AppError;

pub type Row = HashMap<String, String>;

/// A parsed CSV file: header order is preserved because chunk texts (and
/// therefore chunk ids) depend on column iteration order.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl CsvTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

pub fn read_csv_table(path: &Path) -> Result<CsvTable, AppError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (i, header) in headers.iter().enumerate() {
            row.insert(
                header.clone(),
                record.get(i).unwrap_or_default().to_string(),
            );
        }
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// First non-empty value among candidate columns; the crawled files disagree
/// on header names, so every corpus reads through a candidate list.
pub fn first_nonempty(row: &Row, keys: &[&str]) -> String {
    for key in keys {
        if let Some(value) = row.get(*key) {
            let value = value.trim();
            if !value.is_empty() && !value.eq_ignore_ascii_case("nan") {
                return value.to_string();
            }
        }
    }
    String::new()
}

static DEPT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(주관부서:\s*(.*?)\)").unwrap_or_else(|_| unreachable!()));

/// Splits the organizing department out of a schedule description. Returns
/// the cleaned description and the department when the `(주관부서: …)`
/// pattern is present.
pub fn extract_department(description: &str) -> (String, Option<String>) {
    match DEPT_PATTERN.captures(description) {
        Some(caps) => {
            let department = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let cleaned = DEPT_PATTERN.replace_all(description, "").trim().to_string();
            (cleaned, Some(department))
        }
        None => (description.to_string(), None),
    }
}

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2,3}[-.]?\d{3,4}[-.]?\d{4}$").unwrap_or_else(|_| unreachable!())
});

pub fn looks_like_phone(value: &str) -> bool {
    PHONE_PATTERN.is_match(value)
}

/// Normalizes the course grade field for retrieval, e.g. `학사3,4년` →
/// `3학년, 4학년` and `학사2년` → `2학년`.
pub fn normalize_grade(value: &str) -> String {
    let value = value.replace("학사", "");
    if value.contains(',') {
        value
            .replace('년', "")
            .split(',')
            .map(|part| format!("{}학년", part.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        value.replace('년', "학년")
    }
}

/// Outer-joins the major-course table with the course-description table on
/// the course code. Colliding description columns get a `_desc` suffix so no
/// crawled field is lost.
pub fn merge_courses(major: &CsvTable, desc: &CsvTable, join_key: &str) -> CsvTable {
    let mut desc_by_code: HashMap<String, &Row> = HashMap::new();
    for row in &desc.rows {
        let code = row.get(join_key).map(|s| s.trim()).unwrap_or_default();
        if !code.is_empty() {
            desc_by_code.insert(code.to_string(), row);
        }
    }

    let mut headers = major.headers.clone();
    let mut seen: std::collections::HashSet<String> = headers.iter().cloned().collect();
    for header in &desc.headers {
        if header == join_key {
            continue;
        }
        let name = if seen.contains(header) {
            format!("{header}_desc")
        } else {
            header.clone()
        };
        if seen.insert(name.clone()) {
            headers.push(name);
        }
    }

    let mut rows = Vec::new();
    let mut matched: std::collections::HashSet<String> = std::collections::HashSet::new();

    for row in &major.rows {
        let mut merged = row.clone();
        let code = row.get(join_key).map(|s| s.trim()).unwrap_or_default();
        if let Some(desc_row) = desc_by_code.get(code) {
            matched.insert(code.to_string());
            for (key, value) in desc_row.iter() {
                if key == join_key {
                    continue;
                }
                if merged.contains_key(key) {
                    merged.insert(format!("{key}_desc"), value.clone());
                } else {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        rows.push(merged);
    }

    // Description-only courses survive the join too.
    for row in &desc.rows {
        let code = row.get(join_key).map(|s| s.trim()).unwrap_or_default();
        if code.is_empty() || matched.contains(code) {
            continue;
        }
        rows.push(row.clone());
    }

    CsvTable { headers, rows }
}
