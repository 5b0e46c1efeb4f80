//! Per-request context threaded through the FHIR pipeline.
//!
//! Built once per request from the app state and the inbound request parts:
//! the session backends are selected here and nowhere else.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue};
use cookie::Cookie;
use std::sync::Arc;
use url::form_urlencoded;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::services::audit::AuditContext;
use crate::session::{DirectSession, IndirectKeyedSession, SessionResolver, SessionStore};
use crate::state::AppState;

/// Server-assigned request id, inserted by the request id middleware.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub struct RequestContext {
    pub request_id: String,
    pub config: Arc<Config>,
    pub session: SessionResolver,
    /// Inbound headers; only the allow-listed ones ever leave the gateway.
    pub headers: HeaderMap,
    /// Inbound query pairs in arrival order.
    pub query: Vec<(String, String)>,
    /// Inbound query string exactly as received.
    pub raw_query: Option<String>,
    store: Arc<dyn SessionStore>,
    /// A session cookie was presented but could not be used.
    stale_cookie: bool,
}

/// Patient context every FHIR operation requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientContext {
    pub issuer: String,
    pub patient_id: String,
    pub access_token: Option<String>,
    pub dea: Option<String>,
}

impl RequestContext {
    pub fn from_parts(state: &AppState, parts: &Parts) -> Result<Self> {
        let config = state.config.clone();
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut stale_cookie = false;
        let direct = match session_cookie(&parts.headers, &config.session.cookie_name) {
            Some(token) if config.session.direct_sessions_enabled() => {
                match DirectSession::decode(&token, &config.session.cookie_secret) {
                    Ok(direct) => Some(direct),
                    Err(e) => {
                        tracing::info!(error = %e, "Ignoring unusable session cookie");
                        stale_cookie = true;
                        None
                    }
                }
            }
            Some(_) => {
                tracing::debug!("Session cookie ignored; direct sessions are disabled");
                None
            }
            None => None,
        };

        let indirect = parts
            .headers
            .get(config.session.session_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| IndirectKeyedSession::new(id, state.sessions.clone()));

        let query = parts
            .uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Ok(Self {
            request_id,
            config,
            session: SessionResolver::new(direct, indirect),
            headers: parts.headers.clone(),
            query,
            raw_query: parts.uri.query().map(str::to_string),
            store: state.sessions.clone(),
            stale_cookie,
        })
    }

    /// Use an opaque session id taken from the request path.
    pub fn attach_session_id(&mut self, session_id: &str) {
        self.session
            .set_indirect(IndirectKeyedSession::new(session_id, self.store.clone()));
    }

    /// Resolve issuer and patient; both are required before any upstream call.
    pub async fn patient_context(&self, patient_override: Option<&str>) -> Result<PatientContext> {
        let patient_id = match patient_override.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Some(id.to_string()),
            None => self.session.patient_id().await,
        };
        let Some(patient_id) = patient_id else {
            return Err(Error::SessionMissing("no patient_id in session".into()));
        };
        let Some(issuer) = self.session.issuer().await else {
            return Err(Error::SessionMissing("no issuer in session".into()));
        };

        Ok(PatientContext {
            issuer: issuer.trim_end_matches('/').to_string(),
            patient_id,
            access_token: self.session.access_token().await,
            dea: self.session.dea().await,
        })
    }

    pub fn audit_context(&self, patient_id: Option<&str>) -> AuditContext {
        AuditContext {
            request_id: Some(self.request_id.clone()),
            patient_id: patient_id.map(str::to_string),
        }
    }

    /// `Set-Cookie` value when the direct session was written during the
    /// request, or a removal cookie when the presented one was unusable.
    pub fn session_cookie_update(&self) -> Option<HeaderValue> {
        let session = &self.config.session;
        let Some(direct) = self.session.direct().filter(|direct| direct.is_dirty()) else {
            if !self.stale_cookie {
                return None;
            }
            let removal = Cookie::build((session.cookie_name.clone(), ""))
                .path("/")
                .max_age(cookie::time::Duration::ZERO)
                .build();
            return HeaderValue::from_str(&removal.to_string()).ok();
        };

        let token = match direct.encode(&session.cookie_secret, session.ttl()) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to re-issue session cookie");
                return None;
            }
        };

        let max_age = i64::try_from(session.ttl_seconds).unwrap_or(i64::MAX);
        let cookie = Cookie::build((session.cookie_name.clone(), token))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(cookie::SameSite::None)
            .max_age(cookie::time::Duration::seconds(max_age))
            .build();
        HeaderValue::from_str(&cookie.to_string()).ok()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        Self::from_parts(state, parts)
    }
}

fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_named_cookie_among_several() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; cosri_session=abc.def.ghi"),
        );
        assert_eq!(
            session_cookie(&headers, "cosri_session").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(session_cookie(&headers, "other"), None);
    }
}
