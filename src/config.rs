use chrono::Duration;
use std::env;
use url::Url;

/// Limits for the per-client fixed-window rate limiter.
///
/// `environment` is only a label echoed back to clients; the limit itself is
/// always `max_requests`, however the deployment is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub environment: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::minutes(15),
            environment: "development".into(),
        }
    }
}

/// Thresholds for the upstream circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Minimum calls in the rolling window before the error rate is considered.
    pub volume_threshold: u32,
    pub error_threshold_percent: u32,
    pub reset_timeout: Duration,
    pub rolling_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 10,
            error_threshold_percent: 50,
            reset_timeout: Duration::seconds(30),
            rolling_window: Duration::seconds(60),
        }
    }
}

/// Runtime configuration for the plate lookup service.
/// Values are sourced from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_url: String,
    pub api_version: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub cache_ttl: Duration,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

// Upper bound for any configured duration; keeps `now + duration` in range.
const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Parse a positive number of seconds. Unset falls back to `default`; an
/// unparsable, non-positive or out-of-range value is an error.
fn parse_secs(key: &str, raw: Option<&str>, default: i64) -> Result<Duration, String> {
    let secs = match raw.map(str::trim) {
        None => default,
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| format!("{} must be a whole number of seconds, got {:?}", key, s))?,
    };
    if secs <= 0 || secs > MAX_DURATION_SECS {
        return Err(format!("{} must be between 1 and {} seconds, got {}", key, MAX_DURATION_SECS, secs));
    }
    Duration::try_seconds(secs).ok_or_else(|| format!("{} out of range: {}", key, secs))
}

fn env_secs(key: &str, default: i64) -> Result<Duration, String> {
    parse_secs(key, env::var(key).ok().as_deref(), default)
}

impl Config {
    /// Configuration pointing at `api_url` with default limits.
    pub fn new(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: api_url.into(),
            api_version: "v2".into(),
            user_agent: default_user_agent(),
            timeout_secs: 10,
            cache_ttl: Duration::hours(24),
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }

    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - PLATE_API_KEY [required]
    /// - PLATE_API_URL (default: https://wdapi2.com.br/consulta)
    /// - PLATE_API_VERSION (default: v2)
    /// - PLATE_HTTP_TIMEOUT_SECS (default: 10)
    /// - PLATE_USER_AGENT (default: pecaja-lookup/<version>)
    /// - PLATE_CACHE_TTL_SECS (default: 86400)
    /// - PLATE_RATE_LIMIT_MAX (default: 100)
    /// - PLATE_RATE_LIMIT_WINDOW_SECS (default: 900)
    /// - APP_ENV (default: development; label only)
    /// - PLATE_BREAKER_VOLUME_THRESHOLD (default: 10)
    /// - PLATE_BREAKER_ERROR_PERCENT (default: 50)
    /// - PLATE_BREAKER_RESET_SECS (default: 30)
    /// - PLATE_BREAKER_WINDOW_SECS (default: 60)
    pub fn from_env() -> Result<Self, String> {
        let api_key = env::var("PLATE_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Missing PLATE_API_KEY".to_string())?;

        let api_url = env::var("PLATE_API_URL")
            .unwrap_or_else(|_| "https://wdapi2.com.br/consulta".to_string());
        Url::parse(&api_url).map_err(|e| format!("Invalid PLATE_API_URL {}: {}", api_url, e))?;
        let api_url = api_url.trim_end_matches('/').to_string();

        let api_version = env::var("PLATE_API_VERSION").unwrap_or_else(|_| "v2".to_string());
        let timeout_secs = env_or("PLATE_HTTP_TIMEOUT_SECS", 10u64);
        let user_agent = env::var("PLATE_USER_AGENT").unwrap_or_else(|_| default_user_agent());
        let cache_ttl = env_secs("PLATE_CACHE_TTL_SECS", 86_400)?;

        let rate_limit = RateLimitConfig {
            max_requests: env_or("PLATE_RATE_LIMIT_MAX", 100u32),
            window: env_secs("PLATE_RATE_LIMIT_WINDOW_SECS", 900)?,
            environment: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        };
        let error_threshold_percent = env_or("PLATE_BREAKER_ERROR_PERCENT", 50u32);
        if error_threshold_percent == 0 || error_threshold_percent > 100 {
            return Err("PLATE_BREAKER_ERROR_PERCENT must be 1..=100".to_string());
        }
        let breaker = BreakerConfig {
            volume_threshold: env_or("PLATE_BREAKER_VOLUME_THRESHOLD", 10u32).max(1),
            error_threshold_percent,
            reset_timeout: env_secs("PLATE_BREAKER_RESET_SECS", 30)?,
            rolling_window: env_secs("PLATE_BREAKER_WINDOW_SECS", 60)?,
        };

        Ok(Self {
            api_key,
            api_url,
            api_version,
            user_agent,
            timeout_secs,
            cache_ttl,
            rate_limit,
            breaker,
        })
    }
}

fn default_user_agent() -> String {
    format!("pecaja-lookup/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let cfg = Config::new("k", "http://localhost");
        assert_eq!(cfg.timeout_secs, 10);
        assert_eq!(cfg.cache_ttl, Duration::hours(24));
        assert_eq!(cfg.rate_limit.window, Duration::minutes(15));
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert_eq!(cfg.breaker.volume_threshold, 10);
        assert!(cfg.user_agent.starts_with("pecaja-lookup/"));
    }

    #[test]
    fn durations_default_when_unset() {
        assert_eq!(parse_secs("W", None, 900), Ok(Duration::minutes(15)));
        assert_eq!(parse_secs("W", Some(" 60 "), 900), Ok(Duration::seconds(60)));
    }

    #[test]
    fn durations_reject_non_positive_and_huge_values() {
        for raw in ["0", "-60", "99999999999999999", "9000000000000000", "abc", ""] {
            let err = parse_secs("PLATE_RATE_LIMIT_WINDOW_SECS", Some(raw), 900).unwrap_err();
            assert!(err.contains("PLATE_RATE_LIMIT_WINDOW_SECS"), "{}: {}", raw, err);
        }
        assert!(parse_secs("W", Some(&MAX_DURATION_SECS.to_string()), 900).is_ok());
    }
}
