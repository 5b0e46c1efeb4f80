//! Multi-source Bundle aggregation.
//!
//! One logical query ("MedicationRequest for patient X") is translated into
//! each configured source's dialect, fetched concurrently and merged in
//! source-priority order. `total` always equals the number of merged entries.

use axum::http::HeaderMap;
use cosri_upstream::{bearer, header::AUTHORIZATION, HeaderAllowList, UpstreamClient};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;

use super::audit::{AuditEvent, AuditSink};
use super::drug_class::DrugClassAnnotator;
use crate::error::{Error, Result};
use crate::request_context::{PatientContext, RequestContext};
use crate::session::keys;

pub const MEDICATION_RESOURCES: [&str; 2] = ["MedicationRequest", "MedicationOrder"];

/// Resource naming and query convention of an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// R4 EMR: `MedicationRequest?subject=Patient/{id}`.
    Emr,
    /// DSTU2 PDMP: `MedicationOrder` searched by patient demographics and DEA.
    Pdmp,
    /// R4 personal health record, searched like the EMR.
    Phr,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Emr => "emr",
            Dialect::Pdmp => "pdmp",
            Dialect::Phr => "phr",
        }
    }

    /// Resource name this dialect uses for `resource_type`.
    pub fn resource_name(self, resource_type: &str) -> &str {
        match (self, resource_type) {
            (Dialect::Pdmp, "MedicationRequest") => "MedicationOrder",
            (Dialect::Emr | Dialect::Phr, "MedicationOrder") => "MedicationRequest",
            (_, other) => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamSource {
    pub dialect: Dialect,
    /// `None` targets the session issuer.
    pub base_url: Option<String>,
    /// A failing required source fails the whole aggregation.
    pub required: bool,
    /// Inbound headers this source may receive.
    pub headers: HeaderAllowList,
}

impl UpstreamSource {
    pub fn emr(headers: HeaderAllowList) -> Self {
        Self {
            dialect: Dialect::Emr,
            base_url: None,
            required: true,
            headers,
        }
    }

    fn base_url<'a>(&'a self, patient: &'a PatientContext) -> &'a str {
        self.base_url
            .as_deref()
            .unwrap_or(patient.issuer.as_str())
            .trim_end_matches('/')
    }
}

/// Resource type plus patient, independent of any dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalQuery {
    pub resource_type: String,
    /// Extra search parameters passed through to R4 sources.
    pub params: Vec<(String, String)>,
}

impl LogicalQuery {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn is_medication(&self) -> bool {
        MEDICATION_RESOURCES.contains(&self.resource_type.as_str())
    }
}

/// A single planned upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

pub struct BundleAggregator {
    upstream: UpstreamClient,
    sources: Vec<UpstreamSource>,
    annotator: Option<Arc<DrugClassAnnotator>>,
    audit: Arc<dyn AuditSink>,
    default_dea: Option<String>,
}

impl BundleAggregator {
    /// `sources` are in merge priority order.
    pub fn new(
        upstream: UpstreamClient,
        sources: Vec<UpstreamSource>,
        annotator: Option<Arc<DrugClassAnnotator>>,
        audit: Arc<dyn AuditSink>,
        default_dea: Option<String>,
    ) -> Self {
        Self {
            upstream,
            sources,
            annotator,
            audit,
            default_dea,
        }
    }

    pub fn sources(&self) -> &[UpstreamSource] {
        &self.sources
    }

    pub fn source(&self, dialect: Dialect) -> Option<&UpstreamSource> {
        self.sources.iter().find(|source| source.dialect == dialect)
    }

    /// Query every configured source and merge the results.
    pub async fn aggregate(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
        query: &LogicalQuery,
    ) -> Result<Value> {
        let fetches = self
            .sources
            .iter()
            .map(|source| self.fetch_source(ctx, patient, source, query));
        let results = join_all(fetches).await;

        let mut bundles = Vec::with_capacity(results.len());
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(bundle) => bundles.push(bundle),
                Err(e) if source.required => {
                    tracing::warn!(
                        source = source.dialect.name(),
                        error = %e,
                        "Required source failed; aborting aggregation"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        source = source.dialect.name(),
                        error = %e,
                        "Optional source failed; contributing no entries"
                    );
                    self.audit.record(
                        AuditEvent::warning(format!(
                            "{} source unavailable",
                            source.dialect.name()
                        ))
                        .with_tags(["aggregation", source.dialect.name()])
                        .with_context("error", e.to_string())
                        .in_context(&ctx.audit_context(Some(&patient.patient_id))),
                    );
                }
            }
        }

        let mut merged = merge_bundles(bundles);
        self.annotate(ctx, patient, query, &mut merged).await;

        tracing::info!(
            resource_type = %query.resource_type,
            total = merged["total"].as_u64().unwrap_or_default(),
            sources = self.sources.len(),
            "Aggregated bundle"
        );
        Ok(merged)
    }

    /// Query one source only; any failure is returned to the caller.
    pub async fn search_source(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
        dialect: Dialect,
        query: &LogicalQuery,
    ) -> Result<Value> {
        let source = self.source(dialect).ok_or_else(|| {
            Error::NotFound(format!("{} source is not configured", dialect.name()))
        })?;

        let bundle = self.fetch_source(ctx, patient, source, query).await?;
        let mut merged = merge_bundles([bundle]);
        self.annotate(ctx, patient, query, &mut merged).await;
        Ok(merged)
    }

    async fn annotate(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
        query: &LogicalQuery,
        bundle: &mut Value,
    ) {
        if !query.is_medication() {
            return;
        }
        if let Some(annotator) = &self.annotator {
            annotator
                .annotate_bundle(bundle, &ctx.audit_context(Some(&patient.patient_id)))
                .await;
        }
    }

    async fn fetch_source(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
        source: &UpstreamSource,
        query: &LogicalQuery,
    ) -> Result<Value> {
        let request = self.plan(ctx, patient, source, query).await?;
        let headers = self.source_headers(ctx, patient, source);

        tracing::debug!(
            source = source.dialect.name(),
            url = %request.url,
            "Fetching source bundle"
        );
        let response = self
            .upstream
            .fetch(&request.url, &request.params, &headers)
            .await?;
        Ok(response.body)
    }

    /// Translate `query` into `source`'s dialect.
    pub async fn plan(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
        source: &UpstreamSource,
        query: &LogicalQuery,
    ) -> Result<SourceRequest> {
        let base = source.base_url(patient);
        let resource = source.dialect.resource_name(&query.resource_type);
        let url = format!("{base}/{resource}");

        let params = match source.dialect {
            Dialect::Emr | Dialect::Phr => {
                let mut params = vec![(
                    "subject".to_string(),
                    format!("Patient/{}", patient.patient_id),
                )];
                params.extend(query.params.iter().cloned());
                params
            }
            Dialect::Pdmp => {
                let demographics = self.patient_resource(ctx, patient).await?;
                let dea = patient.dea.clone().or_else(|| self.default_dea.clone());
                pdmp_params(&demographics, dea.as_deref())?
            }
        };

        Ok(SourceRequest { url, params })
    }

    /// The session patient's `Patient` resource, memoized in the session.
    pub async fn patient_resource(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
    ) -> Result<Value> {
        let key = keys::patient_resource(&patient.patient_id);
        if let Some(cached) = ctx.session.get(&key).await {
            if cached.get("resourceType").and_then(Value::as_str) == Some("Patient") {
                return Ok(cached);
            }
        }

        let fallback;
        let source = match self.source(Dialect::Emr) {
            Some(source) => source,
            None => {
                fallback = UpstreamSource::emr(HeaderAllowList::default());
                &fallback
            }
        };
        let headers = self.source_headers(ctx, patient, source);
        let url = format!("{}/Patient/{}", patient.issuer, patient.patient_id);
        let response = self.upstream.fetch(&url, &[], &headers).await?;

        ctx.session.set(&key, response.body.clone()).await;
        Ok(response.body)
    }

    /// Allow-listed inbound headers, plus the session bearer for the issuer.
    fn source_headers(
        &self,
        ctx: &RequestContext,
        patient: &PatientContext,
        source: &UpstreamSource,
    ) -> HeaderMap {
        let mut headers = source.headers.forward(&ctx.headers);
        if source.base_url.is_none() && !headers.contains_key(AUTHORIZATION) {
            if let Some(value) = patient.access_token.as_deref().and_then(bearer) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }
}

/// PDMP search parameters from a `Patient` resource.
pub fn pdmp_params(patient: &Value, dea: Option<&str>) -> Result<Vec<(String, String)>> {
    let name = patient
        .get("name")
        .and_then(Value::as_array)
        .and_then(|names| {
            names
                .iter()
                .find(|name| name.get("use").and_then(Value::as_str) == Some("official"))
                .or_else(|| names.first())
        });

    let family = name.and_then(|name| first_string(name.get("family")?));
    let given = name.and_then(|name| first_string(name.get("given")?));
    let birth_date = patient
        .get("birthDate")
        .and_then(Value::as_str)
        .filter(|date| !date.is_empty());

    let (Some(family), Some(given), Some(birth_date)) = (family, given, birth_date) else {
        return Err(Error::BadRequest(
            "patient demographics (family, given, birthDate) are incomplete".into(),
        ));
    };

    let mut params = vec![
        ("subject:Patient.name.family".to_string(), family),
        ("subject:Patient.name.given".to_string(), given),
        (
            "subject:Patient.birthdate".to_string(),
            format!("eq{birth_date}"),
        ),
    ];
    if let Some(dea) = dea.filter(|dea| !dea.is_empty()) {
        params.push(("DEA".to_string(), dea.to_string()));
    }
    Ok(params)
}

/// R4 `family` is a string, DSTU2 `family` and both `given` are arrays.
fn first_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.as_str(),
        Value::Array(items) => items.first()?.as_str()?,
        _ => return None,
    };
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Concatenate the entries of `bundles` in order into one searchset Bundle.
///
/// A bundle without `entry` contributes nothing.
pub fn merge_bundles<I>(bundles: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let mut entries = Vec::new();
    for mut bundle in bundles {
        if let Some(Value::Array(items)) = bundle.get_mut("entry").map(Value::take) {
            entries.extend(items);
        }
    }

    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": entries.len(),
        "entry": entries,
    })
}
