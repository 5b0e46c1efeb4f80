//! Audit event handling.
//!
//! The gateway emits audit events for degraded annotation, upstream failures and
//! front-end submitted events. Delivery is owned by an [`AuditSink`]; the
//! default sink writes structured records to the `audit` tracing target so the
//! log shipper can forward them.
//!
//! Notes:
//! - Recording is best-effort and must not fail the primary request path.
//! - Each event can be rendered as a FHIR R4 `AuditEvent` for downstream stores.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// Request-scoped identifiers stamped onto every event.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub request_id: Option<String>,
    pub patient_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default)]
    pub level: AuditLevel,
    pub message: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Reference to the resource concerned, e.g. `MedicationRequest/123`.
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub recorded: DateTime<Utc>,
    #[serde(default)]
    pub context: Map<String, JsonValue>,
}

impl AuditEvent {
    pub fn new(level: AuditLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            tags: Vec::new(),
            patient_id: None,
            subject: None,
            request_id: None,
            recorded: Utc::now(),
            context: Map::new(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Error, message)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Fill in request and patient ids the event does not already carry.
    pub fn in_context(mut self, ctx: &AuditContext) -> Self {
        if self.request_id.is_none() {
            self.request_id = ctx.request_id.clone();
        }
        if self.patient_id.is_none() {
            self.patient_id = ctx.patient_id.clone();
        }
        self
    }

    /// Render as a FHIR R4 `AuditEvent`.
    pub fn to_fhir(&self, observer: &str) -> JsonValue {
        // FHIR R4 AuditEvent.outcome uses 0|4|8|12 (success -> major failure).
        let outcome = match self.level {
            AuditLevel::Info => "0",
            AuditLevel::Warning => "4",
            AuditLevel::Error => "8",
        };

        let mut entity = vec![];
        if let Some(subject) = &self.subject {
            entity.push(json!({
                "what": { "reference": subject },
                "description": self.message,
            }));
        }
        if let Some(patient_id) = &self.patient_id {
            entity.push(json!({
                "what": { "reference": format!("Patient/{patient_id}") },
                "role": {
                    "system": "http://terminology.hl7.org/CodeSystem/object-role",
                    "code": "1",
                    "display": "Patient"
                }
            }));
        }

        let mut event = json!({
            "resourceType": "AuditEvent",
            "type": {
                "system": "http://dicom.nema.org/resources/ontology/DCM",
                "code": "110100",
                "display": "Application Activity"
            },
            "subtype": self.tags.iter().map(|tag| json!({"code": tag})).collect::<Vec<_>>(),
            "action": "E",
            "recorded": self.recorded.to_rfc3339_opts(SecondsFormat::Millis, true),
            "outcome": outcome,
            "outcomeDesc": self.message,
            "agent": [{
                "who": { "display": observer },
                "requestor": false
            }],
            "source": { "observer": { "display": observer } },
        });

        if !entity.is_empty() {
            event["entity"] = JsonValue::Array(entity);
        }
        event
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes events to the `audit` tracing target.
#[derive(Debug, Clone)]
pub struct TracingAuditSink {
    observer: String,
}

impl TracingAuditSink {
    pub fn new(observer: impl Into<String>) -> Self {
        Self {
            observer: observer.into(),
        }
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let fhir = event.to_fhir(&self.observer);
        let tags = event.tags.join(",");
        let patient_id = event.patient_id.as_deref().unwrap_or("");
        let request_id = event.request_id.as_deref().unwrap_or("");
        let subject = event.subject.as_deref().unwrap_or("");

        match event.level {
            AuditLevel::Info => tracing::info!(
                target: "audit",
                tags = %tags,
                patient_id,
                request_id,
                subject,
                audit_event = %fhir,
                "{}",
                event.message
            ),
            AuditLevel::Warning => tracing::warn!(
                target: "audit",
                tags = %tags,
                patient_id,
                request_id,
                subject,
                audit_event = %fhir,
                "{}",
                event.message
            ),
            AuditLevel::Error => tracing::error!(
                target: "audit",
                tags = %tags,
                patient_id,
                request_id,
                subject,
                audit_event = %fhir,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps events in memory; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_r4_audit_event_shape() {
        let event = AuditEvent::warning("drug class unavailable")
            .with_tags(["annotation", "drug-class"])
            .with_subject(Some("MedicationRequest/1".into()))
            .in_context(&AuditContext {
                request_id: Some("req-1".into()),
                patient_id: Some("123".into()),
            });

        let fhir = event.to_fhir("COSRI gateway");
        assert_eq!(fhir["resourceType"], "AuditEvent");
        assert_eq!(fhir["outcome"], "4");
        assert_eq!(fhir["subtype"][1]["code"], "drug-class");
        assert_eq!(fhir["entity"][0]["what"]["reference"], "MedicationRequest/1");
        assert_eq!(fhir["entity"][1]["what"]["reference"], "Patient/123");
        assert!(fhir.get("recorded").is_some());
    }

    #[test]
    fn context_does_not_override_explicit_ids() {
        let mut event = AuditEvent::info("x");
        event.patient_id = Some("explicit".into());
        let event = event.in_context(&AuditContext {
            request_id: None,
            patient_id: Some("ctx".into()),
        });
        assert_eq!(event.patient_id.as_deref(), Some("explicit"));
    }

    #[test]
    fn front_end_payload_deserializes_with_defaults() {
        let event: AuditEvent =
            serde_json::from_value(json!({"message": "viewed PDMP report", "tags": ["pdmp"]}))
                .unwrap();
        assert_eq!(event.level, AuditLevel::Info);
        assert_eq!(event.tags, vec!["pdmp".to_string()]);
    }

    #[test]
    fn recording_sink_collects() {
        let sink = RecordingAuditSink::new();
        sink.record(AuditEvent::error("boom"));
        assert_eq!(sink.events().len(), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
