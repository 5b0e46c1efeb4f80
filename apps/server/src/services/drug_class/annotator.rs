//! Drug-class annotation of medication resources.
//!
//! Annotation never fails the caller. Every degraded path leaves the resource
//! as it was and records exactly one audit warning.

use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::cache::DrugClassCache;
use super::map::DrugClassMap;
use crate::services::audit::{AuditContext, AuditEvent, AuditSink};

pub const RXNORM_SYSTEM: &str = "http://www.nlm.nih.gov/research/umls/rxnorm";
pub const DRUG_CLASS_EXTENSION_URL: &str = "http://cosri.org/fhir/drug_class";

const MEDICATION_RESOURCE_TYPES: [&str; 2] = ["MedicationRequest", "MedicationOrder"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationOutcome {
    /// Labels now present on the resource (including ones already there).
    Annotated(BTreeSet<String>),
    NoRxNormCode,
    LookupFailed,
    NoDrugClass,
    /// Not a medication resource.
    Skipped,
}

pub struct DrugClassAnnotator {
    cache: Arc<DrugClassCache>,
    map: Arc<DrugClassMap>,
    audit: Arc<dyn AuditSink>,
}

impl DrugClassAnnotator {
    pub fn new(
        cache: Arc<DrugClassCache>,
        map: Arc<DrugClassMap>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { cache, map, audit }
    }

    pub fn cache(&self) -> &DrugClassCache {
        &self.cache
    }

    pub async fn annotate(&self, mut resource: Value, ctx: &AuditContext) -> Value {
        self.annotate_in_place(&mut resource, ctx).await;
        resource
    }

    pub async fn annotate_in_place(
        &self,
        resource: &mut Value,
        ctx: &AuditContext,
    ) -> AnnotationOutcome {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !MEDICATION_RESOURCE_TYPES.contains(&resource_type) {
            return AnnotationOutcome::Skipped;
        }
        let subject = reference(resource);

        let Some(rxcui) = rxnorm_code(resource) else {
            self.warn(ctx, subject, "RxNorm code unavailable", &[]);
            return AnnotationOutcome::NoRxNormCode;
        };

        let class_ids = match self.cache.class_ids(&rxcui).await {
            Ok(class_ids) => class_ids,
            Err(e) => {
                self.warn(
                    ctx,
                    subject,
                    "drug class lookup failed",
                    &[("rxcui", rxcui.as_str()), ("error", &e.to_string())],
                );
                return AnnotationOutcome::LookupFailed;
            }
        };

        let labels = self.map.labels_for(class_ids.iter());
        if labels.is_empty() {
            self.warn(
                ctx,
                subject,
                "drug class unavailable",
                &[("rxcui", rxcui.as_str())],
            );
            return AnnotationOutcome::NoDrugClass;
        }

        append_labels(resource, &labels);
        AnnotationOutcome::Annotated(labels)
    }

    /// Annotate every medication entry of a Bundle, concurrently.
    pub async fn annotate_bundle(&self, bundle: &mut Value, ctx: &AuditContext) {
        let Some(entries) = bundle.get_mut("entry").and_then(Value::as_array_mut) else {
            return;
        };

        let pending = entries
            .iter_mut()
            .filter_map(|entry| entry.get_mut("resource"))
            .map(|resource| self.annotate_in_place(resource, ctx));
        join_all(pending).await;
    }

    fn warn(
        &self,
        ctx: &AuditContext,
        subject: Option<String>,
        message: &str,
        context: &[(&str, &str)],
    ) {
        let event = context.iter().fold(
            AuditEvent::warning(message)
                .with_tags(["annotation", "drug-class"])
                .with_subject(subject)
                .in_context(ctx),
            |event, (key, value)| event.with_context(key, *value),
        );
        self.audit.record(event);
    }
}

/// Code of the first RxNorm coding of `medicationCodeableConcept`.
pub fn rxnorm_code(resource: &Value) -> Option<String> {
    resource
        .get("medicationCodeableConcept")?
        .get("coding")?
        .as_array()?
        .iter()
        .find(|coding| coding.get("system").and_then(Value::as_str) == Some(RXNORM_SYSTEM))?
        .get("code")
        .and_then(|code| match code {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn reference(resource: &Value) -> Option<String> {
    let resource_type = resource.get("resourceType")?.as_str()?;
    let id = resource.get("id")?.as_str()?;
    Some(format!("{resource_type}/{id}"))
}

fn append_labels(resource: &mut Value, labels: &BTreeSet<String>) {
    let Some(concept) = resource
        .get_mut("medicationCodeableConcept")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    let extensions = concept
        .entry("extension")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !extensions.is_array() {
        *extensions = Value::Array(Vec::new());
    }
    let Some(extensions) = extensions.as_array_mut() else {
        return;
    };

    let present: BTreeSet<String> = extensions
        .iter()
        .filter(|ext| ext.get("url").and_then(Value::as_str) == Some(DRUG_CLASS_EXTENSION_URL))
        .filter_map(|ext| ext.get("valueString").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    for label in labels.difference(&present) {
        extensions.push(json!({
            "url": DRUG_CLASS_EXTENSION_URL,
            "valueString": label,
        }));
    }
}
