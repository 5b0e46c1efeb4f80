//! FHIR gateway handlers
//!
//! Each handler builds its [`RequestContext`], delegates to the
//! [`crate::services::FhirRouter`] and re-issues the session cookie when the
//! request wrote to a direct session.

use axum::{
    extract::{Path, State},
    http::header::SET_COOKIE,
    response::{IntoResponse, Json, Response},
};
use std::collections::HashMap;

use crate::error::Result;
use crate::request_context::RequestContext;
use crate::state::AppState;

pub async fn medication_request(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    ctx: RequestContext,
) -> Response {
    medications(state, ctx, "MedicationRequest", params.get("patient_id")).await
}

pub async fn medication_order(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    ctx: RequestContext,
) -> Response {
    medications(state, ctx, "MedicationOrder", params.get("patient_id")).await
}

async fn medications(
    state: AppState,
    ctx: RequestContext,
    resource_type: &str,
    patient_id: Option<&String>,
) -> Response {
    let result = state
        .router
        .medications(&ctx, resource_type, patient_id.map(String::as_str))
        .await
        .map(Json);
    respond(&ctx, result)
}

/// `GET /v/{version}/fhir/emr/{Resource}[/{patient_id}]`
pub async fn emr_search(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    ctx: RequestContext,
) -> Response {
    let resource = params.get("resource").map(String::as_str).unwrap_or_default();
    let result = state
        .router
        .emr_search(&ctx, resource, params.get("patient_id").map(String::as_str))
        .await
        .map(Json);
    respond(&ctx, result)
}

/// `GET /v/{version}/fhir/pdmp/{Resource}`
pub async fn pdmp_search(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    ctx: RequestContext,
) -> Response {
    let resource = params.get("resource").map(String::as_str).unwrap_or_default();
    let result = state.router.pdmp_search(&ctx, resource).await.map(Json);
    respond(&ctx, result)
}

/// `GET /fhir-router/[{session_id}/]{relative_path}`
pub async fn fhir_router(
    State(state): State<AppState>,
    Path(path): Path<String>,
    mut ctx: RequestContext,
) -> Response {
    let (session_id, relative_path) = split_session_id(&path);
    if let Some(session_id) = session_id {
        ctx.attach_session_id(session_id);
    }

    let result = state.router.route(&ctx, relative_path).await;
    respond(&ctx, result)
}

/// Split an optional leading session id off a router path.
///
/// A first segment is FHIR when it is a resource type (an uppercase ASCII
/// letter followed by letters only), a system-level `$operation` or
/// `_parameter`, or `metadata`. Anything else, including uppercase hex ids
/// such as `A1B2C3`, is taken as a session id.
pub fn split_session_id(path: &str) -> (Option<&str>, &str) {
    let path = path.trim_start_matches('/');
    let (first, rest) = path.split_once('/').unwrap_or((path, ""));

    if is_fhir_segment(first) {
        (None, path)
    } else {
        (Some(first), rest)
    }
}

fn is_fhir_segment(segment: &str) -> bool {
    let resource_type = segment.starts_with(|c: char| c.is_ascii_uppercase())
        && segment.chars().all(|c| c.is_ascii_alphabetic());
    segment.is_empty()
        || resource_type
        || segment.starts_with('$')
        || segment.starts_with('_')
        || segment == "metadata"
}

fn respond<T: IntoResponse>(ctx: &RequestContext, result: Result<T>) -> Response {
    let mut response = result.into_response();
    if let Some(cookie) = ctx.session_cookie_update() {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_paths_have_no_session_id() {
        assert_eq!(split_session_id("Observation"), (None, "Observation"));
        assert_eq!(
            split_session_id("Patient/123/$everything"),
            (None, "Patient/123/$everything")
        );
        assert_eq!(split_session_id("metadata"), (None, "metadata"));
    }

    #[test]
    fn leading_lowercase_segment_is_a_session_id() {
        assert_eq!(
            split_session_id("a1b2c3/MedicationRequest"),
            (Some("a1b2c3"), "MedicationRequest")
        );
        assert_eq!(
            split_session_id("/0f9e/Observation/5"),
            (Some("0f9e"), "Observation/5")
        );
    }

    #[test]
    fn uppercase_hex_segment_is_a_session_id() {
        assert_eq!(
            split_session_id("A1B2C3D4/Observation"),
            (Some("A1B2C3D4"), "Observation")
        );
    }

    #[test]
    fn system_operations_and_parameters_are_fhir_paths() {
        assert_eq!(split_session_id("$export"), (None, "$export"));
        assert_eq!(split_session_id("_history"), (None, "_history"));
        assert_eq!(
            split_session_id("abc123/$export"),
            (Some("abc123"), "$export")
        );
    }
}
