use crate::config::Config;
use crate::types::FailureKind;
use base64::Engine; // for STANDARD.encode
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single upstream call. None of them reach the lookup caller
/// as an error; they end up in a fallback result's metadata.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream returned HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },
    #[error("malformed upstream response: {0}")]
    Malformed(String),
    #[error("upstream request failed: {0}")]
    Network(String),
}

impl UpstreamError {
    pub fn kind(&self) -> FailureKind {
        match self {
            UpstreamError::Timeout => FailureKind::Timeout,
            UpstreamError::Http { status, .. } => map_status_to_failure(*status),
            UpstreamError::Malformed(_) => FailureKind::MalformedResponse,
            UpstreamError::Network(_) => FailureKind::Network,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_decode() {
            UpstreamError::Malformed(e.to_string())
        } else {
            UpstreamError::Network(e.to_string())
        }
    }
}

pub fn build_client(cfg: &Config) -> reqwest::Result<Client> {
    let mut default_headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&cfg.user_agent) {
        default_headers.insert(USER_AGENT, ua);
    }
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    // Authorization header is injected per request.
    Client::builder()
        .default_headers(default_headers)
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls()
        .build()
}

/// HTTP Basic credentials with the API key as username and an empty password.
pub fn basic_auth_value(api_key: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:", api_key));
    format!("Basic {}", encoded)
}

fn auth_header(api_key: &str) -> Result<HeaderValue, UpstreamError> {
    HeaderValue::from_str(&basic_auth_value(api_key))
        .map_err(|e| UpstreamError::Network(format!("invalid API key header: {}", e)))
}

pub fn map_status_to_failure(status: StatusCode) -> FailureKind {
    match status {
        StatusCode::NOT_FOUND => FailureKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => FailureKind::RateLimit,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FailureKind::Timeout,
        _ => FailureKind::UpstreamError,
    }
}

pub fn plate_url(cfg: &Config, plate: &str) -> String {
    format!(
        "{}/{}",
        cfg.api_url.trim_end_matches('/'),
        urlencoding::encode(plate)
    )
}

/// GET the vehicle record for `plate` and return the raw body. Non-2xx
/// statuses are errors here, so the breaker sees them as failures; what the
/// body contains is judged later by the caller.
pub async fn fetch_vehicle(client: &Client, cfg: &Config, plate: &str) -> Result<String, UpstreamError> {
    let url = plate_url(cfg, plate);
    debug!("GET {}", url);
    let res = client
        .get(&url)
        .header(AUTHORIZATION, auth_header(&cfg.api_key)?)
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        let message = res.text().await.unwrap_or_default();
        warn!("plate API returned {} for {}", status, plate);
        return Err(UpstreamError::Http {
            status,
            message: truncate(&message, 200),
        });
    }
    Ok(res.text().await?)
}

/// Parse an upstream body as JSON.
pub fn parse_body(body: &str) -> Result<Value, UpstreamError> {
    serde_json::from_str::<Value>(body).map_err(|e| UpstreamError::Malformed(e.to_string()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_uses_key_with_empty_password() {
        assert_eq!(basic_auth_value("test-key"), "Basic dGVzdC1rZXk6");
    }

    #[test]
    fn status_failure_mapping_matrix() {
        assert_eq!(map_status_to_failure(StatusCode::NOT_FOUND), FailureKind::NotFound);
        assert_eq!(map_status_to_failure(StatusCode::UNAUTHORIZED), FailureKind::Unauthorized);
        assert_eq!(map_status_to_failure(StatusCode::FORBIDDEN), FailureKind::Unauthorized);
        assert_eq!(map_status_to_failure(StatusCode::TOO_MANY_REQUESTS), FailureKind::RateLimit);
        assert_eq!(map_status_to_failure(StatusCode::GATEWAY_TIMEOUT), FailureKind::Timeout);
        assert_eq!(
            map_status_to_failure(StatusCode::INTERNAL_SERVER_ERROR),
            FailureKind::UpstreamError
        );
        assert_eq!(map_status_to_failure(StatusCode::BAD_REQUEST), FailureKind::UpstreamError);
    }

    #[test]
    fn url_joins_base_and_plate() {
        let cfg = Config::new("k", "http://api.example/consulta/");
        assert_eq!(plate_url(&cfg, "ABC1234"), "http://api.example/consulta/ABC1234");
    }

    #[test]
    fn parse_body_flags_non_json() {
        assert!(parse_body("{\"marca\":\"VW\"}").is_ok());
        let err = parse_body("<html>oops</html>").unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
    }

    #[test]
    fn truncates_long_bodies() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
