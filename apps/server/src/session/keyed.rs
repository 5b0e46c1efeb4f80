//! Session resolved through an opaque id against a [`SessionStore`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use super::store::{SessionData, SessionStore};
use super::SessionBackend;
use crate::error::Result;

/// Session held server-side and referenced by an opaque identifier.
///
/// The stored blob is fetched at most once per request; writes land in a
/// request-local overlay and are pushed to the store one key at a time.
pub struct IndirectKeyedSession {
    session_id: String,
    store: Arc<dyn SessionStore>,
    blob: OnceCell<Option<SessionData>>,
    overlay: Mutex<SessionData>,
}

impl IndirectKeyedSession {
    pub fn new(session_id: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            blob: OnceCell::new(),
            overlay: Mutex::new(SessionData::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn blob(&self) -> Option<&SessionData> {
        self.blob
            .get_or_init(|| async {
                match self.store.load(&self.session_id).await {
                    Ok(Some(data)) => Some(data),
                    Ok(None) => {
                        tracing::debug!(session_id = %self.session_id, "No stored session");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %self.session_id,
                            error = %e,
                            "Failed to load stored session"
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
    }
}

#[async_trait]
impl SessionBackend for IndirectKeyedSession {
    fn kind(&self) -> &'static str {
        "indirect"
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let pending = self
            .overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned();
        if pending.is_some() {
            return pending;
        }
        self.blob().await.and_then(|data| data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.clone());
        self.store.set_key(&self.session_id, key, value).await
    }
}
