//! API layer - routes, handlers, and middleware

pub mod handlers;
pub mod middleware;
pub mod routes;

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_request_body_size;
    let cors = middleware::cors(&state.config);

    Router::new()
        .route("/health", get(handlers::system::health_check))
        .route("/settings", get(handlers::system::settings))
        .route("/auditlog", post(handlers::system::audit_log))
        .route("/favicon.ico", get(favicon))
        .merge(routes::fhir::fhir_routes())
        .with_state(state)
        // Applied in reverse order
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_body_size))
}

async fn favicon() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
