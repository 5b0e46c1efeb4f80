//! Non-FHIR endpoints: health, public settings and front-end audit events.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::request_context::RequestContext;
use crate::services::audit::AuditEvent;
use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.config.logging.service_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configuration the front-end may read; never includes secrets.
pub async fn settings(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.config;
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "pdmp_enabled": config.upstream.pdmp_base_url.is_some(),
        "phr_enabled": config.upstream.phr_base_url.is_some(),
        "drug_class_annotation": config.drug_class.enabled,
        "session_header": config.session.session_header,
        "cookie_sessions": config.session.direct_sessions_enabled(),
        "forwarded_headers": config.upstream.forwarded_headers,
    }))
}

/// Record an audit event submitted by the front-end.
pub async fn audit_log(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(event): Json<AuditEvent>,
) -> impl IntoResponse {
    let patient_id = ctx.session.patient_id().await;
    let event = event
        .with_tags(["frontend"])
        .in_context(&ctx.audit_context(patient_id.as_deref()));
    state.audit.record(event);

    (StatusCode::OK, Json(json!({"message": "ok"})))
}
