//! Answer orchestration: grounds the LLM with the ranked context block, the
//! session history, and the current KST date, then post-processes the
//! answer and citations for the chat surface.

use std::sync::LazyLock;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use chrono::Utc;
use chrono_tz::Asia::Seoul;
use regex::Regex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, instrument};

use common::error::AppError;
use common::storage::types::message::{Message, MessageRole};

use crate::hybrid::extract_title;
use crate::rerank::RankedChunk;

/// Sentinel context when retrieval produced nothing: the model should answer
/// conversationally rather than refuse.
pub const NO_CONTEXT_SENTINEL: &str =
    "검색된 관련 문서가 없습니다. 일반적인 대화로 응답해주세요.";

#[allow(clippy::unwrap_used)]
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Current date-time rendered for the system prompt, KST.
pub fn current_kst_datetime() -> String {
    Utc::now()
        .with_timezone(&Seoul)
        .format("%Y년 %m월 %d일 %H시 %M분 (KST)")
        .to_string()
}

/// Renders the grounded context block: one numbered document per chunk with
/// its provenance fields, capped at `max_len` characters.
pub fn build_context(ranked: &[RankedChunk], max_len: usize) -> String {
    let mut parts = Vec::with_capacity(ranked.len());
    for (idx, chunk) in ranked.iter().enumerate() {
        let source = if chunk.record.source.is_empty() {
            "알 수 없음"
        } else {
            chunk.record.source.as_str()
        };
        let mut part = format!("문서 {} [출처: {}]:\n", idx + 1, source);
        if !chunk.record.title.is_empty() {
            part.push_str(&format!("제목: {}\n", chunk.record.title));
        }
        if !chunk.record.published_at.is_empty() {
            part.push_str(&format!("게시일: {}\n", chunk.record.published_at));
        }
        if !chunk.record.url.is_empty() {
            part.push_str(&format!("URL: {}\n", chunk.record.url));
        }
        part.push_str(&format!("내용:\n{}\n", chunk.record.chunk_text));
        parts.push(part);
    }

    let context = if parts.is_empty() {
        NO_CONTEXT_SENTINEL.to_string()
    } else {
        parts.join("\n\n---\n\n")
    };

    context.chars().take(max_len).collect()
}

/// Citation lines for the answer footer; HTML remnants are stripped.
pub fn format_citations(ranked: &[RankedChunk]) -> String {
    let lines: Vec<String> = ranked
        .iter()
        .map(|chunk| {
            let title = extract_title(&chunk.record.chunk_text);
            let date = chunk.record.published_at.as_str();
            let url = chunk.record.url.as_str();
            if !url.is_empty() && !date.is_empty() {
                format!("- {title} ({date}) — {url}")
            } else if !url.is_empty() {
                format!("- {title} — {url}")
            } else {
                format!("- {title}")
            }
        })
        .collect();
    strip_html_tags(&lines.join("\n"))
}

pub fn strip_html_tags(text: &str) -> String {
    HTML_TAG.replace_all(text, "").into_owned()
}

/// Markdown bold is disallowed in answers; the model is told so, and this
/// enforces it.
pub fn strip_bold(text: &str) -> String {
    text.replace("**", "")
}

fn system_prompt(context: &str, current_date: &str) -> String {
    format!(
        "당신은 동국대학교 AI 어시스턴트 '동똑이'입니다. 오늘 날짜: {current_date}\n\n\
         [지침]\n\
         1. [컨텍스트] 내용만으로 답변하세요. 없는 정보는 지어내지 마세요.\n\
         2. 답변에서 특정 정보를 언급할 때, 그 정보의 출처 URL이 [컨텍스트]에 있다면 해당 설명 바로 아래에 \"URL: (링크주소)\" 형식으로 적어주세요. 절대 마크다운 링크([텍스트](URL))로 변환하지 말고 주소만 그대로 쓰세요. 주소가 없다면 URL에 대해 쓰지 마세요.\n\
         3. 친절한 한국어(해요체)로 답변하세요.\n\
         4. 절차나 방법은 번호를 매겨 단계별로 설명하세요.\n\
         5. 정보가 없으면 정중히 사과하고 재검색을 유도하세요.\n\
         6. {current_date} 기준 최신 정보를 우선하세요.\n\
         7. 답변에 볼드체(**) 등 마크다운 서식을 절대 사용하지 마세요.\n\
         8. 이전 대화 맥락을 고려하되, 현재 질문이 주제가 바뀌었다면 이전 내용은 무시하고 현재 질문에 집중하세요.\n\
         9. 질문에 '최근', '어제' 등 시간 표현이 있다면, 제공된 [컨텍스트] 내 문서의 '게시일'과 현재 날짜({current_date})를 비교하여 정확히 계산하고 답변하세요.\n\n\
         [컨텍스트]\n{context}"
    )
}

fn history_messages(
    history: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, async_openai::error::OpenAIError> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len());
    for message in history {
        let converted: ChatCompletionRequestMessage = match message.role {
            MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()?
                .into(),
            MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()?
                .into(),
        };
        messages.push(converted);
    }
    Ok(messages)
}

/// Calls the LLM with the grounded prompt, prior session turns, and the
/// question. Transient failures are retried; exhaustion surfaces as
/// `LLMUnavailable`.
#[instrument(skip_all, fields(history = history.len()))]
pub async fn generate_answer(
    client: &Client<OpenAIConfig>,
    model: &str,
    question: &str,
    context: &str,
    history: &[Message],
    current_date: &str,
) -> Result<String, AppError> {
    let context = if context.is_empty() {
        "컨텍스트가 제공되지 않았습니다."
    } else {
        context
    };

    let mut messages: Vec<ChatCompletionRequestMessage> =
        vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt(context, current_date))
            .build()?
            .into()];
    messages.extend(history_messages(history)?);
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(question.to_string())
            .build()?
            .into(),
    );

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(0.2)
        .messages(messages)
        .build()?;

    let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
    let response = Retry::spawn(retry_strategy, || async { client.chat().create(request.clone()).await })
        .await
        .map_err(|e| AppError::LLMUnavailable(e.to_string()))?;

    let answer = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or_default();

    debug!(answer_len = answer.chars().count(), "Answer generated");
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::corpus::CorpusKey;
    use common::storage::types::chunk::ChunkRecord;

    fn ranked(chunk_id: &str, title: &str, date: &str, url: &str, text: &str) -> RankedChunk {
        RankedChunk {
            record: ChunkRecord {
                chunk_id: chunk_id.to_string(),
                chunk_text: text.to_string(),
                title: title.to_string(),
                published_at: date.to_string(),
                url: url.to_string(),
                source: "notices".to_string(),
                ..ChunkRecord::default()
            },
            dataset: CorpusKey::Notices,
            hybrid_score: 0.5,
            norm_hybrid: 1.0,
            norm_recency: 1.0,
            final_score: 1.0,
        }
    }

    #[test]
    fn test_build_context_renders_document_template() {
        let chunks = vec![
            ranked(
                "c1",
                "수강신청 안내",
                "2025-11-10",
                "https://example.ac.kr/1",
                "수강신청 본문",
            ),
            ranked("c2", "", "", "", "제목 없는 본문"),
        ];

        let context = build_context(&chunks, 4000);
        assert!(context.starts_with("문서 1 [출처: notices]:"));
        assert!(context.contains("제목: 수강신청 안내"));
        assert!(context.contains("게시일: 2025-11-10"));
        assert!(context.contains("URL: https://example.ac.kr/1"));
        assert!(context.contains("\n\n---\n\n문서 2 [출처: notices]:"));
        // Absent metadata lines are omitted entirely.
        assert!(!context.contains("문서 2 [출처: notices]:\n제목:"));
    }

    #[test]
    fn test_build_context_empty_uses_sentinel() {
        assert_eq!(build_context(&[], 4000), NO_CONTEXT_SENTINEL);
    }

    #[test]
    fn test_build_context_truncates_by_chars() {
        let chunks = vec![ranked("c1", "제목", "", "", &"가".repeat(500))];
        let context = build_context(&chunks, 100);
        assert_eq!(context.chars().count(), 100);
    }

    #[test]
    fn test_format_citations_variants_and_tag_stripping() {
        let chunks = vec![
            ranked(
                "c1",
                "",
                "2025-11-10",
                "https://example.ac.kr/1",
                "[수강신청 안내]\n\n본문",
            ),
            ranked("c2", "", "", "https://example.ac.kr/2", "[장학금]\n\n본문"),
            ranked("c3", "", "", "", "<b>제목줄</b>만 있는 본문"),
        ];

        let citations = format_citations(&chunks);
        let lines: Vec<&str> = citations.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "- 수강신청 안내 (2025-11-10) — https://example.ac.kr/1"
        );
        assert_eq!(lines[1], "- 장학금 — https://example.ac.kr/2");
        assert!(!lines[2].contains('<'));
    }

    #[test]
    fn test_strip_bold() {
        assert_eq!(strip_bold("이건 **굵게** 쓰지 말기"), "이건 굵게 쓰지 말기");
    }

    #[test]
    fn test_system_prompt_embeds_date_and_context() {
        let prompt = system_prompt("컨텍스트 내용", "2025년 11월 10일 09시 00분 (KST)");
        assert!(prompt.contains("2025년 11월 10일"));
        assert!(prompt.contains("[컨텍스트]\n컨텍스트 내용"));
        assert!(prompt.contains("동똑이"));
    }

    #[tokio::test]
    async fn test_unreachable_llm_is_llm_unavailable() {
        let config = OpenAIConfig::new()
            .with_api_key("sk-test")
            .with_api_base("http://127.0.0.1:9");
        let client = Client::with_config(config);

        let result = generate_answer(
            &client,
            "gpt-4o-mini",
            "수강신청 언제야?",
            "컨텍스트",
            &[],
            "2025년 11월 10일 09시 00분 (KST)",
        )
        .await;

        assert!(matches!(result, Err(AppError::LLMUnavailable(_))));
    }
}
