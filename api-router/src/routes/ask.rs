use axum::{extract::State, Json};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use common::corpus::CorpusKey;
use common::storage::types::message::{Message, MessageRole};
use common::vector::{EqFilter, VectorCollection};
use retrieval_pipeline::{
    answer::{
        build_context, current_kst_datetime, format_citations, generate_answer, strip_bold,
    },
    dates::{extract_date_range, kst_today},
    expansion::expand_query,
    hybrid::hybrid_search_with_meta,
    rerank::merge_and_rerank,
    router::route_query,
    HybridHit,
};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub major: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SourceChunk {
    pub source: String,
    pub metadata: serde_json::Value,
    pub snippet: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub citations: String,
    pub route: Vec<String>,
    pub sources: Vec<SourceChunk>,
}

#[instrument(skip_all)]
pub async fn ask(
    State(state): State<ApiState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let raw_query = request.question.trim();
    if raw_query.is_empty() {
        return Err(ApiError::ValidationError("질문이 비어 있습니다.".to_string()));
    }

    let query = expand_query(raw_query);
    let session_id = request
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(%session_id, %query, "Handling question");

    let date_range = extract_date_range(&query, kst_today());

    // Major narrows the course catalog only; "Default" means no preference.
    let major_filter = request
        .major
        .as_deref()
        .filter(|m| !m.is_empty() && *m != "Default")
        .map(|m| EqFilter {
            field: "major".to_string(),
            value: m.to_string(),
        });

    let route = route_query(&state.openai, &state.config.openai_model, &query).await;

    let frames: Vec<(CorpusKey, Vec<HybridHit>)> = try_join_all(route.iter().map(|key| {
        let key = *key;
        let state = &state;
        let query = &query;
        let major_filter = &major_filter;
        async move {
            let entry = state.catalog.ensure(key).await.map_err(|error| {
                ApiError::DatasetUnavailable(format!("Dataset '{key}' unavailable: {error}"))
            })?;

            let collection = VectorCollection::new(state.db.clone(), key.collection_name())
                .map_err(ApiError::from)?;
            let filter = if key.has_major_field() {
                major_filter.as_ref()
            } else {
                None
            };

            let hits = hybrid_search_with_meta(
                &collection,
                &entry,
                &state.embedder,
                query,
                state.config.default_top_k * 3,
                state.config.hybrid_alpha,
                filter,
            )
            .await
            .map_err(ApiError::from)?;

            info!(corpus = %key, hits = hits.len(), filtered = filter.is_some(), "Corpus retrieved");
            Ok::<_, ApiError>((key, hits))
        }
    }))
    .await?;

    let ranked = merge_and_rerank(
        frames,
        date_range,
        state.config.recency_weight,
        state.config.default_top_k,
    );

    let context = build_context(&ranked, state.config.max_context_length);
    let history = Message::history(
        &session_id,
        state.config.max_history_messages,
        &state.db,
    )
    .await
    .map_err(ApiError::from)?;

    let current_date = current_kst_datetime();
    let answer = generate_answer(
        &state.openai,
        &state.config.openai_model,
        &query,
        &context,
        &history,
        &current_date,
    )
    .await
    .map_err(ApiError::from)?;
    let answer = strip_bold(&answer);

    let citations = format_citations(&ranked);

    // Conversation memory: the question goes in before the answer, in
    // request order for the session.
    Message::append(&session_id, MessageRole::User, &query, &state.db)
        .await
        .map_err(ApiError::from)?;
    Message::append(&session_id, MessageRole::Assistant, &answer, &state.db)
        .await
        .map_err(ApiError::from)?;

    let sources = ranked
        .iter()
        .map(|chunk| {
            let mut metadata = chunk.record.metadata_value();
            if let Some(map) = metadata.as_object_mut() {
                map.remove("title");
            }
            SourceChunk {
                source: chunk.dataset.to_string(),
                metadata,
                snippet: chunk.record.chunk_text.clone(),
            }
        })
        .collect();

    Ok(Json(AskResponse {
        answer,
        citations,
        route: route.iter().map(ToString::to_string).collect(),
        sources,
    }))
}
