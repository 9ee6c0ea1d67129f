use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// Paths match what the original course frontend calls
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Generation and execution
        .route("/query", post(handlers::api::generate_query))
        .route("/execute-query", post(handlers::api::execute_query))
        .route("/ask", post(handlers::api::ask))

        // Introspection
        .route("/schema", get(handlers::api::get_schema))
        .route("/status", get(handlers::api::system_status))
}
