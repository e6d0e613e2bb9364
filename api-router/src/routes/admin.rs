use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use common::storage::types::pending_item::{PendingItem, PendingStatus};
use ingestion_pipeline::moderation;
use retrieval_pipeline::dates::kst_today;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub source_type: String,
    pub data: String,
}

pub async fn submit(
    State(state): State<ApiState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let item = moderation::submit(&state.db, &request.source_type, &request.data).await?;
    Ok(Json(json!({ "status": "ok", "id": item.id })))
}

pub async fn list_pending(
    State(state): State<ApiState>,
) -> Result<Json<Vec<PendingItem>>, ApiError> {
    let items = PendingItem::list_pending(&state.db).await?;
    Ok(Json(items))
}

pub async fn list_items(
    State(state): State<ApiState>,
) -> Result<Json<Vec<PendingItem>>, ApiError> {
    let items = PendingItem::list_all(&state.db).await?;
    info!(count = items.len(), "Listed moderation queue");
    Ok(Json(items))
}

/// Approval runs on a detached task: once the relational commit happens the
/// index update must finish even if the client goes away.
pub async fn approve(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
) -> Json<serde_json::Value> {
    let handle = tokio::spawn(async move {
        moderation::approve(
            &state.db,
            &state.embedder,
            &state.catalog,
            &item_id,
            kst_today(),
        )
        .await
    });

    match handle.await {
        Ok(Ok(outcome)) => match outcome.status {
            PendingStatus::Approved => Json(json!({
                "status": "approved",
                "chunk_id": outcome.chunk_id,
            })),
            PendingStatus::ApprovedManually => Json(json!({ "status": "approved_manually" })),
            other => Json(json!({
                "status": "error",
                "message": format!("unexpected approval status {other:?}"),
            })),
        },
        Ok(Err(error)) => {
            error!(%error, "Approval failed");
            Json(json!({ "status": "error", "message": error.to_string() }))
        }
        Err(join_error) => {
            error!(%join_error, "Approval task panicked");
            Json(json!({ "status": "error", "message": join_error.to_string() }))
        }
    }
}

pub async fn reject(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    moderation::reject(&state.db, &item_id).await?;
    Ok(Json(json!({ "status": "rejected" })))
}
