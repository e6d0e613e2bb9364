use api_state::ApiState;
use axum::{
    routing::{get, post},
    Router,
};
use routes::{
    admin::{approve, list_items, list_pending, reject, submit},
    ask::ask,
    health::health,
};

pub mod api_state;
pub mod error;
mod routes;

/// The service's HTTP surface: the question endpoint, the moderation queue,
/// and the health probe.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/ask", post(ask))
        .route("/admin/submit", post(submit))
        .route("/admin/pending", get(list_pending))
        .route("/admin/items", get(list_items))
        .route("/admin/approve/{id}", post(approve))
        .route("/admin/reject/{id}", post(reject))
        .route("/health", get(health))
        .with_state(state)
}
