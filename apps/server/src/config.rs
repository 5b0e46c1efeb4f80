//! Gateway configuration
//!
//! Configuration is resolved once at startup from an optional TOML file and
//! `GATEWAY__*` environment variable overrides (e.g. `GATEWAY__SERVER__PORT=9090`),
//! then shared read-only through [`crate::state::AppState`].

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use cosri_upstream::RXNAV_BASE_URL;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "gateway.toml";
pub const ENV_PREFIX: &str = "GATEWAY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub upstream: UpstreamConfig,
    pub drug_class: DrugClassConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin (`*`), unless cookie
    /// sessions are enabled, in which case the request origin is echoed.
    pub cors_origins: Vec<String>,
    pub max_request_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            max_request_body_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie carrying the signed browser session.
    pub cookie_name: String,
    /// HS256 secret for the browser session cookie. Empty disables direct sessions.
    pub cookie_secret: String,
    /// Header carrying an opaque session id (alternative to the router path segment).
    pub session_header: String,
    /// Keyed session store. `None` uses the in-process store.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "cosri_session".to_string(),
            cookie_secret: String::new(),
            session_header: "x-session-id".to_string(),
            redis_url: None,
            key_prefix: "session:".to_string(),
            ttl_seconds: 3600,
        }
    }
}

impl SessionConfig {
    pub fn direct_sessions_enabled(&self) -> bool {
        !self.cookie_secret.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// PDMP FHIR base URL; `None` leaves the PDMP out of aggregation.
    pub pdmp_base_url: Option<String>,
    /// Whether a PDMP failure aborts medication aggregation.
    pub pdmp_required: bool,
    /// PHR FHIR base URL; `None` disables PHR routes and aggregation.
    pub phr_base_url: Option<String>,
    pub phr_required: bool,
    pub drug_reference_base_url: String,
    /// DEA number sent to the PDMP when the session carries none.
    pub default_dea: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub forwarded_headers: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            pdmp_base_url: None,
            pdmp_required: true,
            phr_base_url: None,
            phr_required: false,
            drug_reference_base_url: RXNAV_BASE_URL.to_string(),
            default_dea: None,
            timeout_seconds: 30,
            max_retries: 1,
            retry_backoff_ms: 100,
            forwarded_headers: vec!["Authorization".to_string(), "Cache-Control".to_string()],
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrugClassConfig {
    pub enabled: bool,
    /// Class-id → label table. `None` uses the table bundled with the binary.
    pub map_path: Option<PathBuf>,
    pub rela_source: Option<String>,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
    /// Uncached lookups slower than this are logged.
    pub slow_lookup_threshold_ms: u64,
}

impl Default for DrugClassConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            map_path: None,
            rela_source: None,
            cache_ttl_seconds: 24 * 60 * 60,
            cache_capacity: 4096,
            slow_lookup_threshold_ms: 10,
        }
    }
}

impl DrugClassConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn slow_lookup_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_lookup_threshold_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// daily, hourly, minutely or never
    pub file_rotation: String,
    pub service_name: String,
    pub deployment_environment: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "fhir-gateway".to_string(),
            file_rotation: "daily".to_string(),
            service_name: "cosri-gateway".to_string(),
            deployment_environment: "development".to_string(),
        }
    }
}

impl Config {
    /// Load from `gateway.toml` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from `path` (falling back to `gateway.toml`) and the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigLoader::builder();

        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(ConfigError::NotFound(file.display().to_string()));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .with_list_parse_key("upstream.forwarded_headers"),
        );

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.upstream.timeout_seconds == 0 {
            return Err("upstream.timeout_seconds must be greater than zero".into());
        }
        if self.drug_class.cache_capacity == 0 {
            return Err("drug_class.cache_capacity must be greater than zero".into());
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err("session.cookie_name cannot be empty".into());
        }

        let urls = [
            (
                "upstream.drug_reference_base_url",
                Some(&self.upstream.drug_reference_base_url),
            ),
            ("upstream.pdmp_base_url", self.upstream.pdmp_base_url.as_ref()),
            ("upstream.phr_base_url", self.upstream.phr_base_url.as_ref()),
            ("session.redis_url", self.session.redis_url.as_ref()),
        ];
        for (key, value) in urls {
            if let Some(value) = value {
                url::Url::parse(value).map_err(|e| format!("{key} is not a valid URL: {e}"))?;
            }
        }

        if !matches!(
            self.logging.file_rotation.as_str(),
            "daily" | "hourly" | "minutely" | "never"
        ) {
            return Err(format!(
                "logging.file_rotation must be daily, hourly, minutely or never (got {})",
                self.logging.file_rotation
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().unwrap().port(), 8000);
        assert!(!config.session.direct_sessions_enabled());
        assert_eq!(
            config.upstream.forwarded_headers,
            vec!["Authorization".to_string(), "Cache-Control".to_string()]
        );
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = Config::default();
        config.upstream.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_pdmp_url() {
        let mut config = Config::default();
        config.upstream.pdmp_base_url = Some("pdmp without scheme".into());
        let err = config.validate().unwrap_err();
        assert!(err.contains("upstream.pdmp_base_url"));
    }

    #[test]
    fn rejects_unknown_rotation() {
        let mut config = Config::default();
        config.logging.file_rotation = "weekly".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = Config::load_from(Some(Path::new("/nonexistent/gateway.toml")));
        assert!(result.is_err());
    }
}
