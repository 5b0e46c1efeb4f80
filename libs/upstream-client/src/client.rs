//! Retrying JSON fetch wrapper used for every outbound call

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Settings for [`UpstreamClient`].
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Extra attempts after the first one for retryable failures.
    pub max_retries: u32,
    /// Base delay between attempts; multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 1,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// A successful (2xx) upstream response with its parsed JSON body.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub url: String,
    pub body: Value,
    /// Body bytes exactly as received.
    pub raw: Vec<u8>,
}

/// HTTP GET client for upstream FHIR servers and reference APIs.
///
/// Every request has a bounded timeout. Non-2xx responses become
/// [`Error::Status`] and bodies that are not JSON become [`Error::Malformed`];
/// the caller decides whether either aborts its operation.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamClientConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UpstreamClientConfig {
        &self.config
    }

    /// Fetch `url` with `params` appended to its query string.
    pub async fn fetch(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse> {
        let target = build_url(url, params)?;
        self.fetch_url(target, headers).await
    }

    /// Fetch a fully built URL, keeping its query string exactly as given.
    pub async fn fetch_url(&self, url: Url, headers: &HeaderMap) -> Result<UpstreamResponse> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(&url, headers).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %e,
                        "Retrying upstream request"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &Url, headers: &HeaderMap) -> Result<UpstreamResponse> {
        let mut request_headers = headers.clone();
        if !request_headers.contains_key(ACCEPT) {
            request_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }

        let response = self
            .client
            .get(url.clone())
            .headers(request_headers)
            .send()
            .await
            .map_err(|e| classify(e, url))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Upstream returned error status");
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| classify(e, url))?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| Error::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            url: url.to_string(),
            body,
            raw: bytes.to_vec(),
        })
    }
}

/// Parse `base` and append `params` as query pairs.
pub fn build_url(base: &str, params: &[(String, String)]) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| Error::InvalidUrl(format!("{base}: {e}")))?;
    if !params.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
}

fn classify(error: reqwest::Error, url: &Url) -> Error {
    if error.is_timeout() {
        tracing::warn!(url = %url, "Upstream request timed out");
        Error::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() || error.is_request() {
        Error::Connect {
            url: url.to_string(),
            reason: error.to_string(),
        }
    } else {
        Error::Http(error)
    }
}
