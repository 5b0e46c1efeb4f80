//! Error types for the FHIR gateway

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session context missing: {0}")]
    SessionMissing(String),

    #[error("Upstream {url} responded with status {status}")]
    Upstream { status: u16, url: String },

    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::SessionMissing(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::MalformedResponse { .. } => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::SessionStore(_) | Error::Internal(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<cosri_upstream::Error> for Error {
    fn from(error: cosri_upstream::Error) -> Self {
        match error {
            cosri_upstream::Error::Malformed { url, reason } => {
                Error::MalformedResponse { url, reason }
            }
            cosri_upstream::Error::InvalidUrl(msg) => {
                Error::BadRequest(format!("invalid upstream URL: {msg}"))
            }
            cosri_upstream::Error::InvalidHeader(msg) => Error::Config(msg),
            other => Error::Upstream {
                status: other.status(),
                url: other.url().unwrap_or_default().to_string(),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {}", self);
            "Internal server error".to_string()
        } else {
            if status.is_server_error() {
                tracing::warn!(status = status.as_u16(), "{}", self);
            }
            self.to_string()
        };

        let body = Json(json!({
            "message": message,
            "status": status.as_u16(),
        }));

        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}
