//! Browser-held session carried in a signed (HS256) cookie.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use super::store::SessionData;
use super::SessionBackend;
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    exp: i64,
    iat: i64,
    #[serde(default)]
    session: SessionData,
}

/// Session values the browser presents directly on every request.
///
/// Writes stay in this request's copy and mark it dirty; the API layer then
/// re-issues the cookie so the browser carries the update forward.
#[derive(Debug, Default)]
pub struct DirectSession {
    data: RwLock<SessionData>,
    dirty: AtomicBool,
}

impl DirectSession {
    pub fn new(data: SessionData) -> Self {
        Self {
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    /// Verify and unpack a session cookie value.
    pub fn decode(token: &str, secret: &str) -> Result<Self> {
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| Error::BadRequest(format!("invalid session cookie: {e}")))?;

        Ok(Self::new(token_data.claims.session))
    }

    /// Sign the current values into a fresh cookie value valid for `ttl`.
    pub fn encode(&self, secret: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            exp: now + ttl.as_secs() as i64,
            iat: now,
            session: self.snapshot(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("failed to sign session cookie: {e}")))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionData {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SessionBackend for DirectSession {
    fn kind(&self) -> &'static str {
        "direct"
    }

    async fn get(&self, key: &str) -> Option<Value> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn data() -> SessionData {
        let mut data = SessionData::new();
        data.insert("iss".into(), json!("https://emr.example/fhir"));
        data.insert("patient_id".into(), json!("X"));
        data
    }

    #[tokio::test]
    async fn cookie_round_trip_preserves_values() {
        let token = DirectSession::new(data())
            .encode(SECRET, Duration::from_secs(60))
            .unwrap();
        let session = DirectSession::decode(&token, SECRET).unwrap();
        assert_eq!(session.get("patient_id").await, Some(json!("X")));
        assert!(!session.is_dirty());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = DirectSession::new(data())
            .encode(SECRET, Duration::from_secs(60))
            .unwrap();
        assert!(matches!(
            DirectSession::decode(&token, "other-secret"),
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn set_marks_dirty() {
        let session = DirectSession::new(data());
        session.set("dea", json!("AB1234563")).await.unwrap();
        assert!(session.is_dirty());
        assert_eq!(session.snapshot()["dea"], "AB1234563");
    }
}
