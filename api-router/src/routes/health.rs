use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Service liveness plus per-corpus chunk counts; unloaded corpora report
/// zero instead of forcing a load.
pub async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let counts = state.catalog.counts().await;
    let datasets: BTreeMap<String, usize> = counts
        .into_iter()
        .map(|(key, count)| (key.to_string(), count))
        .collect();

    Json(json!({ "status": "ok", "datasets": datasets }))
}
