//! Per-corpus document builders: each corpus turns its source records into
//! rich chunk texts with a corpus-specific layout before the shared
//! character-window chunking applies.

use common::storage::types::chunk::ParentRef;
use common::storage::types::course::Course;
use common::storage::types::notice::Notice;
use common::storage::types::rule::Rule;
use common::storage::types::schedule::Schedule;
use common::storage::types::staff::Staff;
use common::utils::preprocess::{make_doc_id, normalize_whitespace, strip_html, DocSource};

use crate::sources::{looks_like_phone, CsvTable};

const COURSE_TITLE_CANDIDATES: [&str; 6] = [
    "국문교과목명",
    "과목명",
    "course_name",
    "교과목명",
    "title",
    "교과목",
];

pub fn build_notice_docs(notices: &[Notice]) -> Vec<DocSource> {
    let mut docs = Vec::new();
    for notice in notices {
        let clean = normalize_whitespace(&strip_html(&notice.content));
        if clean.is_empty() {
            continue;
        }

        // Board name goes into the text so lexical search can match it.
        let text = if notice.board.is_empty() {
            clean
        } else {
            format!("[게시판: {}]\n\n{}", notice.board, clean)
        };

        docs.push(DocSource {
            doc_id: make_doc_id(&[&notice.title, &notice.board, &notice.published_date]),
            title: notice.title.clone(),
            text,
            source: "notices".to_string(),
            topics: notice.board.clone(),
            published_at: notice.published_date.clone(),
            url: notice.detail_url.clone(),
            attachments: notice.attachments.clone(),
            parent: Some(ParentRef::Notice(notice.id.clone())),
            ..DocSource::default()
        });
    }
    docs
}

pub fn build_rule_docs(rules: &[Rule]) -> Vec<DocSource> {
    let mut docs = Vec::new();
    for rule in rules {
        let text = rule.full_text.trim();
        if text.is_empty() {
            continue;
        }

        let head: String = text.chars().take(40).collect();
        let doc_id = if rule.filename.is_empty() {
            make_doc_id(&["rules", &rule.relative_dir, &head])
        } else {
            make_doc_id(&["rules", &rule.relative_dir, &rule.filename])
        };

        let title = if !rule.filename.is_empty() {
            rule.filename.clone()
        } else {
            let short: String = text.chars().take(80).collect();
            if short.is_empty() {
                "학칙 문서".to_string()
            } else {
                short
            }
        };

        docs.push(DocSource {
            doc_id,
            title,
            text: text.to_string(),
            source: "rules".to_string(),
            topics: "규정".to_string(),
            parent: Some(ParentRef::Rule(rule.id.clone())),
            ..DocSource::default()
        });
    }
    docs
}

pub fn build_schedule_docs(schedules: &[Schedule]) -> Vec<DocSource> {
    let mut docs = Vec::new();
    for schedule in schedules {
        if schedule.content.is_empty() {
            continue;
        }

        let mut period = schedule.start_date.clone();
        if !schedule.end_date.is_empty() && schedule.end_date != schedule.start_date {
            period.push_str(&format!(" ~ {}", schedule.end_date));
        }

        let mut text = format!(
            "학사일정: {}\n\n{}\n\n기간: {}",
            schedule.title, schedule.content, period
        );
        if !schedule.department.is_empty() {
            text.push_str(&format!("\n\n주관부서: {}", schedule.department));
        }

        let topics = if schedule.category.is_empty() {
            "schedule".to_string()
        } else {
            schedule.category.clone()
        };

        docs.push(DocSource {
            doc_id: make_doc_id(&[
                "schedule",
                &schedule.start_date,
                &schedule.end_date,
                &schedule.content,
            ]),
            title: schedule.title.clone(),
            text,
            source: "schedule".to_string(),
            topics,
            // The date post-filter keys on the start date of the event.
            published_at: schedule.start_date.clone(),
            parent: Some(ParentRef::Schedule(schedule.id.clone())),
            ..DocSource::default()
        });
    }
    docs
}

/// Courses keep one chunk per record: the text lists every crawled field as
/// `label: value` lines so a single vector carries the whole syllabus row.
pub fn build_course_docs(table: &CsvTable, records: &[Course]) -> Vec<DocSource> {
    let mut docs = Vec::new();
    for (row, course) in table.rows.iter().zip(records) {
        let mut text_parts: Vec<String> = Vec::new();
        for column in &table.headers {
            if column.starts_with("Unnamed") {
                continue;
            }
            let value = row.get(column).map(|v| v.trim()).unwrap_or_default();
            if value.is_empty() {
                continue;
            }
            if COURSE_TITLE_CANDIDATES.contains(&column.as_str()) {
                text_parts.push(value.to_string());
            } else {
                let label = normalize_whitespace(column);
                let value = if label == "개설학기" && (value == "1" || value == "2") {
                    format!("{value}학기")
                } else {
                    value.to_string()
                };
                text_parts.push(format!("{label}: {value}"));
            }
        }

        let text = text_parts.join("\n").trim().to_string();
        if text.is_empty() {
            continue;
        }

        let code_or_title = if course.course_code.is_empty() {
            course.title.as_str()
        } else {
            course.course_code.as_str()
        };

        docs.push(DocSource {
            doc_id: make_doc_id(&["courses", code_or_title, &course.source_table]),
            title: course.title.clone(),
            text,
            source: "courses".to_string(),
            topics: course.source_table.clone(),
            major: course.major.clone(),
            parent: Some(ParentRef::Course(course.id.clone())),
            ..DocSource::default()
        });
    }
    docs
}

/// Staff rows have no reliable schema beyond the organization column, so the
/// builder sweeps every cell, pulls out the phone number by pattern, and
/// lays the rest out as a contact card.
pub fn build_staff_docs(table: &CsvTable, records: &[Staff]) -> Vec<DocSource> {
    let mut docs = Vec::new();
    for (row, staff) in table.rows.iter().zip(records) {
        let department = staff.department.clone();

        let mut info_parts: Vec<String> = Vec::new();
        let mut phone = String::new();
        for column in &table.headers {
            if column == "조직(트리)" || column.starts_with("Unnamed") {
                continue;
            }
            let value = row.get(column).map(|v| v.trim()).unwrap_or_default();
            if value.is_empty() || value.eq_ignore_ascii_case("nan") {
                continue;
            }
            if looks_like_phone(value) {
                phone = value.to_string();
            } else {
                info_parts.push(value.to_string());
            }
        }

        let name_candidate = info_parts
            .first()
            .cloned()
            .unwrap_or_else(|| "교직원".to_string());
        let content = info_parts.join(" ");

        let mut text = format!("소속: {department}\n\n정보: {content}");
        if !phone.is_empty() {
            text.push_str(&format!("\n\n전화번호: {phone}"));
        }

        docs.push(DocSource {
            doc_id: make_doc_id(&["staff", &department, &text]),
            title: format!("{department} - {name_candidate}"),
            text,
            source: "staff".to_string(),
            topics: department,
            parent: Some(ParentRef::Staff(staff.id.clone())),
            ..DocSource::default()
        });
    }
    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::RecordOrigin;
    use std::collections::HashMap;

    fn notice(title: &str, board: &str, date: &str, content: &str) -> Notice {
        Notice::new(
            board.to_string(),
            title.to_string(),
            "일반".to_string(),
            date.to_string(),
            "false".to_string(),
            format!("https://example.ac.kr/{title}"),
            content.to_string(),
            "[]".to_string(),
            RecordOrigin::Auto,
        )
    }

    #[test]
    fn test_notice_docs_prefix_board_and_skip_empty() {
        let notices = vec![
            notice("수강신청 안내", "일반공지", "2025-11-10", "<p>본문 내용</p>"),
            notice("빈 공지", "일반공지", "2025-11-10", "  "),
        ];

        let docs = build_notice_docs(&notices);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.starts_with("[게시판: 일반공지]"));
        assert_eq!(docs[0].published_at, "2025-11-10");
        assert_eq!(
            docs[0].doc_id,
            make_doc_id(&["수강신청 안내", "일반공지", "2025-11-10"])
        );
        assert!(matches!(docs[0].parent, Some(ParentRef::Notice(_))));
    }

    #[test]
    fn test_rule_docs_fall_back_to_text_head() {
        let with_name = Rule::new(
            "학칙.txt".to_string(),
            "규정집".to_string(),
            "제1조 목적".to_string(),
        );
        let nameless = Rule::new(
            String::new(),
            "규정집".to_string(),
            "제2조 정의에 관한 조문".to_string(),
        );

        let docs = build_rule_docs(&[with_name, nameless]);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "학칙.txt");
        assert_eq!(docs[1].title, "제2조 정의에 관한 조문");
        assert_eq!(docs[0].topics, "규정");
    }

    #[test]
    fn test_schedule_docs_carry_period_and_department() {
        let schedule = Schedule::new(
            "수강신청".to_string(),
            "2025-08-04".to_string(),
            "2025-08-08".to_string(),
            "학사".to_string(),
            "학사지원팀".to_string(),
            "수강신청 기간".to_string(),
        );

        let docs = build_schedule_docs(&[schedule]);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.contains("학사일정: 수강신청"));
        assert!(docs[0].text.contains("기간: 2025-08-04 ~ 2025-08-08"));
        assert!(docs[0].text.contains("주관부서: 학사지원팀"));
        assert_eq!(docs[0].published_at, "2025-08-04");
    }

    #[test]
    fn test_course_docs_label_fields_and_format_semester() {
        let table = CsvTable {
            headers: vec![
                "학수번호".to_string(),
                "교과목명".to_string(),
                "개설학기".to_string(),
                "이수대상".to_string(),
            ],
            rows: vec![[
                ("학수번호".to_string(), "STA4001".to_string()),
                ("교과목명".to_string(), "회귀분석".to_string()),
                ("개설학기".to_string(), "2".to_string()),
                ("이수대상".to_string(), "3학년, 4학년".to_string()),
            ]
            .into_iter()
            .collect::<HashMap<_, _>>()],
        };
        let course = Course::new(
            "STA4001".to_string(),
            "회귀분석".to_string(),
            "회귀모형".to_string(),
            "combined_statistics".to_string(),
            "{}".to_string(),
            "통계학과".to_string(),
        );

        let docs = build_course_docs(&table, &[course]);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.contains("학수번호: STA4001"));
        assert!(docs[0].text.contains("회귀분석"));
        assert!(docs[0].text.contains("개설학기: 2학기"));
        assert_eq!(docs[0].major, "통계학과");
    }

    #[test]
    fn test_staff_docs_extract_phone() {
        let table = CsvTable {
            headers: vec![
                "조직(트리)".to_string(),
                "Data_0".to_string(),
                "Data_1".to_string(),
            ],
            rows: vec![[
                ("조직(트리)".to_string(), "학사지원팀".to_string()),
                ("Data_0".to_string(), "김직원".to_string()),
                ("Data_1".to_string(), "02-2260-3114".to_string()),
            ]
            .into_iter()
            .collect::<HashMap<_, _>>()],
        };
        let staff = Staff::new(
            "학사지원팀".to_string(),
            "김직원".to_string(),
            "02-2260-3114".to_string(),
            "{}".to_string(),
        );

        let docs = build_staff_docs(&table, &[staff]);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.contains("소속: 학사지원팀"));
        assert!(docs[0].text.contains("전화번호: 02-2260-3114"));
        assert_eq!(docs[0].title, "학사지원팀 - 김직원");
    }
}
