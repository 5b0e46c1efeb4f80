//! Layer factories for middleware

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::Config;

/// CORS middleware
///
/// Without configured origins every origin is allowed (`*`). Cookie sessions
/// need credentials, and browsers reject `*` with credentials, so in that case
/// the request `Origin` is echoed instead.
pub fn cors(config: &Config) -> CorsLayer {
    let mut allow_headers = vec![header::AUTHORIZATION, header::CACHE_CONTROL, header::CONTENT_TYPE];
    if let Ok(name) = HeaderName::from_bytes(config.session.session_header.as_bytes()) {
        allow_headers.push(name);
    }

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(allow_headers)
        .expose_headers([HeaderName::from_static("x-request-id")]);

    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let credentials = config.session.direct_sessions_enabled();

    match (origins.is_empty(), credentials) {
        (false, _) => layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(credentials),
        (true, true) => layer
            .allow_origin(AllowOrigin::mirror_request())
            .allow_credentials(true),
        (true, false) => layer.allow_origin(Any),
    }
}
