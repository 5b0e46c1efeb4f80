//! Keyed session stores backing [`super::IndirectKeyedSession`].
//!
//! A session blob is a JSON object stored under an opaque session id. The
//! gateway only reads blobs written by the launch flow and occasionally writes
//! back cached sub-resources.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

pub type SessionData = Map<String, Value>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>>;

    async fn save(&self, session_id: &str, data: &SessionData) -> Result<()>;

    /// Write one key, keeping whatever else is currently stored.
    ///
    /// Re-reads the blob right before saving so keys changed elsewhere since
    /// the request started are not overwritten.
    async fn set_key(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let mut data = self.load(session_id).await?.unwrap_or_default();
        data.insert(key.to_string(), value);
        self.save(session_id, &data).await
    }
}

/// In-process store for development and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
    loads: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: impl Into<String>, data: SessionData) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.into(), data);
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionData> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    /// Number of `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, data: &SessionData) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), data.clone());
        Ok(())
    }

    async fn set_key(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Redis-backed store shared with the launch service.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    pub async fn connect(url: &str, key_prefix: &str, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid session redis URL: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::SessionStore(format!("failed to connect to redis: {e}")))?;

        tracing::info!(key_prefix = %key_prefix, "Connected to redis session store");

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            ttl_seconds,
        })
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .get(self.key(session_id))
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(data)) => Ok(Some(data)),
            Ok(_) => Err(Error::SessionStore(format!(
                "session {session_id} is not a JSON object"
            ))),
            Err(e) => Err(Error::SessionStore(format!(
                "session {session_id} could not be decoded: {e}"
            ))),
        }
    }

    async fn save(&self, session_id: &str, data: &SessionData) -> Result<()> {
        let payload = serde_json::to_string(data)
            .map_err(|e| Error::SessionStore(format!("failed to encode session: {e}")))?;
        let mut connection = self.connection.clone();
        connection
            .set_ex::<_, _, ()>(self.key(session_id), payload, self.ttl_seconds)
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))
    }
}
