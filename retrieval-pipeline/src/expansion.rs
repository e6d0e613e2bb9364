//! Query expansion: campus slang and abbreviations students actually type
//! are rewritten to the official wording the corpora use.

/// Slang → official term. Extend as new abbreviations show up in query logs.
const SYNONYMS: [(&str, &str); 9] = [
    ("드랍", "수강신청 취소"),
    ("학고", "학사경고"),
    ("학점포기", "성적포기"),
    ("계절학기", "계절수업"),
    ("칼졸업", "조기졸업"),
    ("공결", "공식 결석"),
    ("팀플", "팀 프로젝트"),
    ("도서관", "중앙도서관"),
    ("수강정정", "수강신청 정정"),
];

pub fn expand_query(query: &str) -> String {
    let mut expanded = query.to_string();
    for (slang, formal) in SYNONYMS {
        expanded = expanded.replace(slang, formal);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_known_slang() {
        assert_eq!(expand_query("드랍 기간 알려줘"), "수강신청 취소 기간 알려줘");
        assert_eq!(expand_query("학고 기준"), "학사경고 기준");
    }

    #[test]
    fn test_leaves_other_text_untouched() {
        assert_eq!(expand_query("수강신청 일정"), "수강신청 일정");
        assert_eq!(expand_query(""), "");
    }

    #[test]
    fn test_multiple_replacements_in_one_query() {
        assert_eq!(
            expand_query("팀플 때문에 공결 가능한가요"),
            "팀 프로젝트 때문에 공식 결석 가능한가요"
        );
    }
}
