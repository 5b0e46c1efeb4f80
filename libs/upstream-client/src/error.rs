//! Error types for upstream-client

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Upstream fetch errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Upstream {url} responded with status {status}")]
    Status { status: u16, url: String },

    #[error("Upstream {url} timed out")]
    Timeout { url: String },

    #[error("Upstream {url} unreachable: {reason}")]
    Connect { url: String, reason: String },

    #[error("Malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// HTTP status a caller should mirror for this failure.
    ///
    /// Timeouts and connection failures collapse into the gateway 5xx range so
    /// routing does not have to tell them apart.
    pub fn status(&self) -> u16 {
        match self {
            Error::Status { status, .. } => *status,
            Error::Timeout { .. } => 504,
            Error::Connect { .. } | Error::Malformed { .. } | Error::Http(_) => 502,
            Error::InvalidUrl(_) | Error::InvalidHeader(_) => 500,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Error::Status { url, .. }
            | Error::Timeout { url }
            | Error::Connect { url, .. }
            | Error::Malformed { url, .. } => Some(url),
            Error::InvalidUrl(_) | Error::InvalidHeader(_) | Error::Http(_) => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed { .. })
    }

    /// Whether repeating the same idempotent GET could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { .. } | Error::Connect { .. } => true,
            Error::Status { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}
