pub mod assertions;
pub mod fixtures;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    Router,
};
use cosri_gateway::{
    api::create_router,
    services::audit::{AuditSink, RecordingAuditSink},
    session::{DirectSession, MemorySessionStore, SessionData, SessionStore},
    AppState, Config,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _;
use uuid::Uuid;
use wiremock::MockServer;

pub use assertions::*;
pub use fixtures::*;

pub const COOKIE_SECRET: &str = "integration-test-secret";

/// Gateway wired to mock EMR, PDMP and RxNav servers.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sessions: Arc<MemorySessionStore>,
    pub audit: Arc<RecordingAuditSink>,
    pub emr: MockServer,
    pub pdmp: MockServer,
    pub rxnav: MockServer,
}

impl TestApp {
    pub async fn new() -> anyhow::Result<Self> {
        Self::new_with_config(|_| {}).await
    }

    pub async fn new_with_config(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let emr = MockServer::start().await;
        let pdmp = MockServer::start().await;
        let rxnav = MockServer::start().await;

        let mut config = Config::default();
        config.session.cookie_secret = COOKIE_SECRET.to_string();
        config.upstream.pdmp_base_url = Some(pdmp.uri());
        config.upstream.drug_reference_base_url = rxnav.uri();
        config.upstream.max_retries = 0;
        config.upstream.timeout_seconds = 5;
        config.drug_class.slow_lookup_threshold_ms = 60_000;
        configure(&mut config);

        let sessions = Arc::new(MemorySessionStore::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let state = AppState::with_components(
            config,
            sessions.clone() as Arc<dyn SessionStore>,
            audit.clone() as Arc<dyn AuditSink>,
            None,
        )
        .context("initialize AppState")?;
        let router = create_router(state.clone());

        Ok(Self {
            router,
            state,
            sessions,
            audit,
            emr,
            pdmp,
            rxnav,
        })
    }

    /// Session data for `patient_id` issued by the mock EMR.
    pub fn launch_session(&self, patient_id: &str) -> SessionData {
        let mut data = SessionData::new();
        data.insert("iss".into(), Value::String(self.emr.uri()));
        data.insert("patient_id".into(), Value::String(patient_id.into()));
        data.insert("access_token".into(), Value::String("emr-token".into()));
        data.insert("dea".into(), Value::String("AB1234563".into()));
        data
    }

    /// Store `data` under a fresh opaque session id.
    pub async fn keyed_session(&self, data: SessionData) -> String {
        let session_id = Uuid::new_v4().simple().to_string();
        self.sessions.insert(session_id.clone(), data).await;
        session_id
    }

    /// `Cookie` header value carrying `data` as a direct session.
    pub fn session_cookie(&self, data: SessionData) -> anyhow::Result<String> {
        let token = DirectSession::new(data)
            .encode(COOKIE_SECRET, Duration::from_secs(300))
            .context("sign session cookie")?;
        Ok(format!(
            "{}={}",
            self.state.config.session.cookie_name, token
        ))
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        self.request_with_extra_headers(method, path_and_query, body, &[])
            .await
    }

    pub async fn request_with_extra_headers(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
        extra_headers: &[(&str, &str)],
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        let mut request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", "gateway.example.org")
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .body(match body {
                Some(bytes) => Body::from(bytes),
                None => Body::empty(),
            })
            .context("build request")?;

        for (name, value) in extra_headers {
            request.headers_mut().append(
                name.parse::<HeaderName>().context("parse header name")?,
                value.parse::<HeaderValue>().context("parse header value")?,
            );
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;

        Ok((status, headers, body))
    }

    /// GET as the holder of keyed session `session_id`.
    pub async fn get_with_session(
        &self,
        path_and_query: &str,
        session_id: &str,
        extra_headers: &[(&str, &str)],
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        let mut headers = vec![("x-session-id", session_id)];
        headers.extend_from_slice(extra_headers);
        self.request_with_extra_headers(Method::GET, path_and_query, None, &headers)
            .await
    }

    /// Number of requests every mock upstream has received.
    pub async fn upstream_request_count(&self) -> usize {
        let mut total = 0;
        for server in [&self.emr, &self.pdmp, &self.rxnav] {
            total += server
                .received_requests()
                .await
                .map(|requests| requests.len())
                .unwrap_or_default();
        }
        total
    }
}
