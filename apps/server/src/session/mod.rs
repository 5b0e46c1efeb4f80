//! Session resolution.
//!
//! A request may carry a direct browser session (signed cookie), an opaque
//! session id that refers to a server-side blob, both, or neither. Both
//! backends are selected once per request and read through [`SessionResolver`]:
//! a key is looked up in the direct session first, then the keyed store, then
//! the caller's default.

pub mod direct;
pub mod keyed;
pub mod store;

pub use direct::DirectSession;
pub use keyed::IndirectKeyedSession;
pub use store::{MemorySessionStore, RedisSessionStore, SessionData, SessionStore};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Well-known session keys written by the SMART launch flow.
pub mod keys {
    pub const ISSUER: &str = "iss";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const PATIENT_ID: &str = "patient_id";
    pub const TOKEN_RESPONSE: &str = "token_response";
    pub const DEA: &str = "dea";

    /// Key under which a fetched Patient resource is memoized.
    pub fn patient_resource(patient_id: &str) -> String {
        format!("patient:{patient_id}")
    }
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Uniform read/write view over the session backends of one request.
#[derive(Default)]
pub struct SessionResolver {
    direct: Option<DirectSession>,
    indirect: Option<IndirectKeyedSession>,
}

impl SessionResolver {
    pub fn new(direct: Option<DirectSession>, indirect: Option<IndirectKeyedSession>) -> Self {
        Self { direct, indirect }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Replace the keyed backend, e.g. with a session id taken from the path.
    pub fn set_indirect(&mut self, indirect: IndirectKeyedSession) {
        self.indirect = Some(indirect);
    }

    pub fn direct(&self) -> Option<&DirectSession> {
        self.direct.as_ref()
    }

    pub fn indirect(&self) -> Option<&IndirectKeyedSession> {
        self.indirect.as_ref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.direct.is_none() && self.indirect.is_none()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(direct) = &self.direct {
            if let Some(value) = direct.get(key).await {
                return Some(value);
            }
        }
        if let Some(indirect) = &self.indirect {
            return indirect.get(key).await;
        }
        None
    }

    pub async fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).await.unwrap_or(default)
    }

    /// String value of `key`; numbers are accepted, empty strings are not.
    pub async fn get_str(&self, key: &str) -> Option<String> {
        value_as_string(self.get(key).await?)
    }

    /// Best-effort write to the active backend. Failures are logged, never returned.
    pub async fn set(&self, key: &str, value: Value) {
        let backend: &dyn SessionBackend = match (&self.direct, &self.indirect) {
            (Some(direct), _) => direct,
            (None, Some(indirect)) => indirect,
            (None, None) => {
                tracing::debug!(key, "No session backend; dropping session write");
                return;
            }
        };

        if let Err(e) = backend.set(key, value).await {
            tracing::warn!(
                key,
                backend = backend.kind(),
                error = %e,
                "Session write failed"
            );
        }
    }

    /// Base URL of the patient's home FHIR server.
    pub async fn issuer(&self) -> Option<String> {
        self.get_str(keys::ISSUER).await
    }

    pub async fn access_token(&self) -> Option<String> {
        match self.get_str(keys::ACCESS_TOKEN).await {
            Some(token) => Some(token),
            None => self.token_response_field("access_token").await,
        }
    }

    pub async fn patient_id(&self) -> Option<String> {
        match self.get_str(keys::PATIENT_ID).await {
            Some(id) => Some(id),
            None => self.token_response_field("patient").await,
        }
    }

    pub async fn dea(&self) -> Option<String> {
        self.get_str(keys::DEA).await
    }

    async fn token_response_field(&self, field: &str) -> Option<String> {
        let token_response = self.get(keys::TOKEN_RESPONSE).await?;
        value_as_string(token_response.get(field)?.clone())
    }
}

fn value_as_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn data(pairs: &[(&str, Value)]) -> SessionData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn direct_value_wins_without_touching_store() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .insert("sid", data(&[("patient_id", json!("Y"))]))
            .await;

        let resolver = SessionResolver::new(
            Some(DirectSession::new(data(&[("patient_id", json!("X"))]))),
            Some(IndirectKeyedSession::new("sid", store.clone())),
        );

        assert_eq!(resolver.patient_id().await.as_deref(), Some("X"));
        assert_eq!(store.load_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_keyed_store() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .insert("sid", data(&[("patient_id", json!("Y"))]))
            .await;

        let resolver =
            SessionResolver::new(None, Some(IndirectKeyedSession::new("sid", store.clone())));

        assert_eq!(resolver.patient_id().await.as_deref(), Some("Y"));
        assert_eq!(resolver.get_or("missing", json!("d")).await, json!("d"));
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn anonymous_returns_default() {
        let resolver = SessionResolver::anonymous();
        assert!(resolver.is_anonymous());
        assert_eq!(resolver.get("iss").await, None);
        assert_eq!(resolver.get_or("iss", json!(null)).await, json!(null));
        resolver.set("iss", json!("ignored")).await;
    }

    #[tokio::test]
    async fn token_response_fallbacks() {
        let resolver = SessionResolver::new(
            Some(DirectSession::new(data(&[(
                "token_response",
                json!({"access_token": "tok", "patient": 1234}),
            )]))),
            None,
        );
        assert_eq!(resolver.access_token().await.as_deref(), Some("tok"));
        assert_eq!(resolver.patient_id().await.as_deref(), Some("1234"));
    }

    #[tokio::test]
    async fn blank_values_are_missing() {
        let resolver = SessionResolver::new(
            Some(DirectSession::new(data(&[("patient_id", json!("  "))]))),
            None,
        );
        assert_eq!(resolver.patient_id().await, None);
    }

    #[tokio::test]
    async fn write_goes_to_direct_when_present() {
        let store = Arc::new(MemorySessionStore::new());
        store.insert("sid", SessionData::new()).await;
        let resolver = SessionResolver::new(
            Some(DirectSession::new(SessionData::new())),
            Some(IndirectKeyedSession::new("sid", store.clone())),
        );

        resolver.set("dea", json!("AB1234563")).await;

        assert!(resolver.direct().unwrap().is_dirty());
        assert!(store.snapshot("sid").await.unwrap().get("dea").is_none());
    }
}
