//! Gateway routes
//!
//! Medication routes aggregate across sources; `emr`/`pdmp` routes query one
//! source; `/fhir-router` serves any relative FHIR path for the session issuer.
//! Both the plain and trailing-slash forms are registered.

use crate::api::handlers::fhir;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn fhir_routes() -> Router<AppState> {
    Router::new()
        .route("/v/:version/fhir/MedicationRequest", get(fhir::medication_request))
        .route("/v/:version/fhir/MedicationRequest/", get(fhir::medication_request))
        .route(
            "/v/:version/fhir/MedicationRequest/:patient_id",
            get(fhir::medication_request),
        )
        .route("/v/:version/fhir/MedicationOrder", get(fhir::medication_order))
        .route("/v/:version/fhir/MedicationOrder/", get(fhir::medication_order))
        .route(
            "/v/:version/fhir/MedicationOrder/:patient_id",
            get(fhir::medication_order),
        )
        .route("/v/:version/fhir/emr/:resource", get(fhir::emr_search))
        .route(
            "/v/:version/fhir/emr/:resource/:patient_id",
            get(fhir::emr_search),
        )
        .route("/v/:version/fhir/pdmp/:resource", get(fhir::pdmp_search))
        .route("/fhir-router/*path", get(fhir::fhir_router))
}
