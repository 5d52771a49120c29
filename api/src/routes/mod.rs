pub mod auth;
pub mod cheating_logs;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::AppState;
use crate::constants::EXAM_API_PREFIX;

async fn health() -> &'static str {
    "ok"
}

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .nest(EXAM_API_PREFIX, cheating_logs::routes())
}
