//! LLM-backed corpus routing: the model picks which corpora can answer the
//! query from a fixed enumeration. Keyword rules proved too brittle for
//! conversational queries, so the router stays declarative and delegates
//! intent reading to the model.

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat},
    Client,
};
use serde::Deserialize;
use tracing::{debug, warn};

use common::corpus::CorpusKey;

/// Schema the router model must answer with.
#[derive(Debug, Deserialize)]
struct RouteChoice {
    names: Vec<String>,
}

fn format_destinations() -> String {
    CorpusKey::ALL
        .iter()
        .map(|key| format!("- {}: {}", key, key.router_description()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn router_prompt(query: &str) -> String {
    format!(
        "사용자의 질문을 분석하여 가장 관련 있는 데이터셋으로 라우팅하는 역할을 수행합니다.\n\
         질문에 답변하기 위해 참조해야 할 가장 적절한 데이터셋을 하나 이상 선택하세요.\n\n\
         사용 가능한 데이터셋:\n{destinations}\n\n\
         사용자 질문:\n{query}\n\n\
         선택된 데이터셋의 이름을 포함하는 JSON 객체를 다음 형식으로 출력하세요:\n\
         {{\"names\": [\"notices\", \"schedule\"]}}\n",
        destinations = format_destinations(),
        query = query,
    )
}

fn parse_routes(content: &str) -> Option<Vec<CorpusKey>> {
    let choice: RouteChoice = serde_json::from_str(content).ok()?;
    let routes: Vec<CorpusKey> = choice
        .names
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();
    if routes.is_empty() {
        None
    } else {
        Some(routes)
    }
}

/// Chooses the corpora for a query. Always returns a non-empty subset of
/// the known corpora; any model failure degrades to `[notices]`.
pub async fn route_query(
    client: &Client<OpenAIConfig>,
    model: &str,
    query: &str,
) -> Vec<CorpusKey> {
    if query.trim().is_empty() {
        return vec![CorpusKey::Notices];
    }

    match request_routes(client, model, query).await {
        Ok(Some(routes)) => {
            debug!(?routes, "Router decision");
            routes
        }
        Ok(None) => {
            warn!("Router returned no usable corpus names; defaulting to notices");
            vec![CorpusKey::Notices]
        }
        Err(error) => {
            warn!(%error, "Router LLM call failed; defaulting to notices");
            vec![CorpusKey::Notices]
        }
    }
}

async fn request_routes(
    client: &Client<OpenAIConfig>,
    model: &str,
    query: &str,
) -> Result<Option<Vec<CorpusKey>>, async_openai::error::OpenAIError> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(0.0)
        .response_format(ResponseFormat::JsonObject)
        .messages([ChatCompletionRequestUserMessageArgs::default()
            .content(router_prompt(query))
            .build()?
            .into()])
        .build()?;

    let response = client.chat().create(request).await?;
    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or_default();

    Ok(parse_routes(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes_filters_unknown_names() {
        let routes = parse_routes(r#"{"names": ["rules", "made_up", "schedule"]}"#);
        assert_eq!(
            routes,
            Some(vec![CorpusKey::Rules, CorpusKey::Schedule])
        );
    }

    #[test]
    fn test_parse_routes_preserves_order() {
        let routes = parse_routes(r#"{"names": ["courses", "notices"]}"#);
        assert_eq!(
            routes,
            Some(vec![CorpusKey::Courses, CorpusKey::Notices])
        );
    }

    #[test]
    fn test_parse_routes_rejects_garbage() {
        assert_eq!(parse_routes("not json"), None);
        assert_eq!(parse_routes(r#"{"names": []}"#), None);
        assert_eq!(parse_routes(r#"{"names": ["unknown"]}"#), None);
    }

    #[test]
    fn test_prompt_lists_every_corpus() {
        let prompt = router_prompt("수강신청 언제야?");
        for key in CorpusKey::ALL {
            assert!(prompt.contains(key.as_str()));
        }
        assert!(prompt.contains("수강신청 언제야?"));
    }

    #[tokio::test]
    async fn test_unreachable_llm_falls_back_to_notices() {
        let config = OpenAIConfig::new()
            .with_api_key("sk-test")
            .with_api_base("http://127.0.0.1:9");
        let client = Client::with_config(config);

        let routes = route_query(&client, "gpt-4o-mini", "수강신청 일정").await;
        assert_eq!(routes, vec![CorpusKey::Notices]);
    }

    #[tokio::test]
    async fn test_empty_query_short_circuits() {
        let config = OpenAIConfig::new()
            .with_api_key("sk-test")
            .with_api_base("http://127.0.0.1:9");
        let client = Client::with_config(config);

        let routes = route_query(&client, "gpt-4o-mini", "   ").await;
        assert_eq!(routes, vec![CorpusKey::Notices]);
    }
}
