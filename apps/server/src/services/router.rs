//! Top-level FHIR dispatch.
//!
//! Every operation first resolves issuer and patient from the session; a
//! request without both is rejected before anything is sent upstream.
//! Medication resources are aggregated across sources, everything else is
//! proxied to the session issuer.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cosri_upstream::{bearer, header::AUTHORIZATION, HeaderAllowList, UpstreamClient};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use super::aggregator::{BundleAggregator, Dialect, LogicalQuery, MEDICATION_RESOURCES};
use crate::error::{Error, Result};
use crate::request_context::{PatientContext, RequestContext};

/// Search parameters the gateway sets itself on aggregated queries.
const RESERVED_PARAMS: [&str; 2] = ["subject", "patient"];

#[derive(Debug, Clone, PartialEq)]
pub enum FhirResponse {
    Json(Value),
    /// Upstream body returned byte for byte with the upstream status.
    Raw { status: u16, body: Vec<u8> },
}

impl FhirResponse {
    /// Body as JSON; parses raw bodies.
    pub fn json(&self) -> Option<Value> {
        match self {
            FhirResponse::Json(value) => Some(value.clone()),
            FhirResponse::Raw { body, .. } => serde_json::from_slice(body).ok(),
        }
    }
}

impl IntoResponse for FhirResponse {
    fn into_response(self) -> Response {
        match self {
            FhirResponse::Json(value) => Json(value).into_response(),
            FhirResponse::Raw { status, body } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
                (
                    status,
                    [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                    body,
                )
                    .into_response()
            }
        }
    }
}

/// How a relative FHIR path is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Aggregate(&'a str),
    Passthrough(&'a str),
}

impl<'a> Route<'a> {
    /// Only a bare medication type search is aggregated; instance reads such
    /// as `MedicationRequest/{id}` go to the issuer unchanged.
    pub fn classify(path: &'a str) -> Self {
        let path = path.trim_matches('/');
        if MEDICATION_RESOURCES.contains(&path) {
            Route::Aggregate(path)
        } else {
            Route::Passthrough(path)
        }
    }
}

pub struct FhirRouter {
    upstream: UpstreamClient,
    aggregator: Arc<BundleAggregator>,
    forward: HeaderAllowList,
}

impl FhirRouter {
    pub fn new(
        upstream: UpstreamClient,
        aggregator: Arc<BundleAggregator>,
        forward: HeaderAllowList,
    ) -> Self {
        Self {
            upstream,
            aggregator,
            forward,
        }
    }

    pub fn aggregator(&self) -> &BundleAggregator {
        &self.aggregator
    }

    /// Serve `path` relative to the FHIR base.
    pub async fn route(&self, ctx: &RequestContext, path: &str) -> Result<FhirResponse> {
        let patient = ctx.patient_context(None).await?;

        match Route::classify(path) {
            Route::Aggregate(resource) => {
                let bundle = self
                    .aggregator
                    .aggregate(ctx, &patient, &self.logical_query(ctx, resource))
                    .await?;
                Ok(FhirResponse::Json(bundle))
            }
            Route::Passthrough(path) => self.passthrough(ctx, &patient, path).await,
        }
    }

    /// Aggregated medication Bundle for the session patient or `patient_id`.
    pub async fn medications(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        patient_id: Option<&str>,
    ) -> Result<Value> {
        if !MEDICATION_RESOURCES.contains(&resource_type) {
            return Err(Error::NotFound(format!(
                "{resource_type} is not an aggregated resource"
            )));
        }
        let patient = ctx.patient_context(patient_id).await?;
        self.aggregator
            .aggregate(ctx, &patient, &self.logical_query(ctx, resource_type))
            .await
    }

    /// Search the EMR alone. `Patient` reads the patient resource itself.
    pub async fn emr_search(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        patient_id: Option<&str>,
    ) -> Result<Value> {
        let patient = ctx.patient_context(patient_id).await?;
        if resource_type == "Patient" {
            return self.aggregator.patient_resource(ctx, &patient).await;
        }
        self.aggregator
            .search_source(
                ctx,
                &patient,
                Dialect::Emr,
                &self.logical_query(ctx, resource_type),
            )
            .await
    }

    /// Search the PDMP alone for the session patient.
    pub async fn pdmp_search(&self, ctx: &RequestContext, resource_type: &str) -> Result<Value> {
        let patient = ctx.patient_context(None).await?;
        self.aggregator
            .search_source(
                ctx,
                &patient,
                Dialect::Pdmp,
                &LogicalQuery::new(resource_type),
            )
            .await
    }

    /// Proxy `GET {issuer}/{path}?{inbound query}` and return the body verbatim.
    ///
    /// The inbound query string is forwarded as received, without re-encoding.
    pub async fn passthrough(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
        path: &str,
    ) -> Result<FhirResponse> {
        let path = path.trim_matches('/');
        if path.is_empty() || path.split('/').any(|segment| segment == "..") {
            return Err(Error::BadRequest(format!("invalid FHIR path: {path:?}")));
        }

        let mut headers = self.forward.forward(&ctx.headers);
        if !headers.contains_key(AUTHORIZATION) {
            if let Some(value) = patient.access_token.as_deref().and_then(bearer) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let mut url = Url::parse(&format!("{}/{}", patient.issuer, path))
            .map_err(|e| Error::BadRequest(format!("invalid FHIR path {path:?}: {e}")))?;
        url.set_query(ctx.raw_query.as_deref().filter(|query| !query.is_empty()));
        tracing::debug!(url = %url, "Passing request through to issuer");
        let response = self.upstream.fetch_url(url, &headers).await?;

        Ok(FhirResponse::Raw {
            status: response.status,
            body: response.raw,
        })
    }

    fn logical_query(&self, ctx: &RequestContext, resource_type: &str) -> LogicalQuery {
        let params = ctx
            .query
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
            .cloned()
            .collect();
        LogicalQuery::new(resource_type).with_params(params)
    }
}
