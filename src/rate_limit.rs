//! Fixed-window rate limiter keyed by client IP.
//!
//! Each key gets its own window on first use. A window that has elapsed is
//! replaced at check time; nothing runs in the background. At most once per
//! window length a check also sweeps every elapsed window, so keys that are
//! never seen again do not accumulate. Only allowed checks are counted, so a
//! blocked client stays at `max_requests`.

use crate::config::RateLimitConfig;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "x-ratelimit-retry-after";

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    window_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub current_count: u32,
    pub max_requests: u32,
    pub remaining_requests: u32,
    pub reset_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    pub environment: String,
}

impl RateLimitDecision {
    /// Values for the `X-RateLimit-*` response headers.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_LIMIT, self.max_requests.to_string()),
            (HEADER_REMAINING, self.remaining_requests.to_string()),
            (HEADER_RESET, self.reset_time.timestamp().to_string()),
        ];
        if let Some(secs) = self.retry_after_seconds {
            pairs.push((HEADER_RETRY_AFTER, secs.to_string()));
        }
        pairs
    }
}

/// Read-only view of one key's window.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub client_key: String,
    pub current_count: u32,
    pub max_requests: u32,
    pub remaining_requests: u32,
    pub window_start: DateTime<Utc>,
    pub reset_time: DateTime<Utc>,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub tracked_keys: usize,
    pub max_requests: u32,
    pub window_seconds: i64,
    pub environment: String,
}

#[derive(Debug, Default)]
struct Windows {
    by_key: HashMap<String, RateLimitWindow>,
    last_sweep: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    windows: Mutex<Windows>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(Windows::default()),
            config,
        }
    }

    fn window_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_signed(self.config.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn sweep(&self, windows: &mut Windows, now: DateTime<Utc>) {
        let due = windows.last_sweep.map_or(true, |at| now >= self.window_end(at));
        if !due {
            return;
        }
        let before = windows.by_key.len();
        windows.by_key.retain(|_, w| now < self.window_end(w.window_start));
        windows.last_sweep = Some(now);
        let dropped = before - windows.by_key.len();
        if dropped > 0 {
            debug!("rate limiter swept {} elapsed windows", dropped);
        }
    }

    pub fn check(&self, client_key: &str) -> RateLimitDecision {
        self.check_at(client_key, Utc::now())
    }

    pub fn check_at(&self, client_key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let max = self.config.max_requests;
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        self.sweep(&mut windows, now);
        let window = windows
            .by_key
            .entry(client_key.to_string())
            .or_insert(RateLimitWindow {
                count: 0,
                window_start: now,
            });
        if now >= self.window_end(window.window_start) {
            *window = RateLimitWindow {
                count: 0,
                window_start: now,
            };
        }
        let reset_time = self.window_end(window.window_start);
        let allowed = window.count < max;
        if allowed {
            window.count += 1;
        }
        let retry_after_seconds = if allowed {
            None
        } else {
            // Round up so clients never retry a fraction of a second early.
            let millis = (reset_time - now).num_milliseconds().max(0) as u64;
            Some(millis.div_ceil(1000))
        };
        RateLimitDecision {
            allowed,
            current_count: window.count,
            max_requests: max,
            remaining_requests: max.saturating_sub(window.count),
            reset_time,
            retry_after_seconds,
            environment: self.config.environment.clone(),
        }
    }

    /// Drop the window for `client_key`; returns whether one existed.
    pub fn clear(&self, client_key: &str) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        windows.by_key.remove(client_key).is_some()
    }

    pub fn stats_for(&self, client_key: &str) -> Option<RateLimitStatus> {
        self.stats_for_at(client_key, Utc::now())
    }

    /// Current window for `client_key` without counting a request. An elapsed
    /// window reads as empty.
    pub fn stats_for_at(&self, client_key: &str, now: DateTime<Utc>) -> Option<RateLimitStatus> {
        let windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let window = windows.by_key.get(client_key)?;
        let max = self.config.max_requests;
        let (count, window_start) = if now >= self.window_end(window.window_start) {
            (0, now)
        } else {
            (window.count, window.window_start)
        };
        Some(RateLimitStatus {
            client_key: client_key.to_string(),
            current_count: count,
            max_requests: max,
            remaining_requests: max.saturating_sub(count),
            window_start,
            reset_time: self.window_end(window_start),
            environment: self.config.environment.clone(),
        })
    }

    /// Keys currently holding a window, elapsed or not.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().expect("rate limiter mutex poisoned").by_key.len()
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tracked_keys: self.tracked_keys(),
            max_requests: self.config.max_requests,
            window_seconds: self.config.window.num_seconds(),
            environment: self.config.environment.clone(),
        }
    }
}
