//! Circuit breaker guarding the upstream plate API.
//!
//! ```text
//! CLOSED    -> OPEN       calls >= volume_threshold and error rate >= threshold (rolling window)
//! OPEN      -> HALF_OPEN  reset_timeout elapsed, checked on the next execute
//! HALF_OPEN -> CLOSED     probe succeeded
//! HALF_OPEN -> OPEN       probe failed, timer restarts
//! ```
//!
//! Only one probe runs in HALF_OPEN; concurrent callers are rejected until it
//! settles. A forced open stays open until `force_close`.

use crate::config::BreakerConfig;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Probe,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Option<DateTime<Utc>>,
    forced_open: bool,
    probe_in_flight: bool,
    // (completed_at, failed)
    window: VecDeque<(DateTime<Utc>, bool)>,
    failures: u64,
    successes: u64,
    rejections: u64,
    total_calls: u64,
    last_failure_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            forced_open: false,
            probe_in_flight: false,
            window: VecDeque::new(),
            failures: 0,
            successes: 0,
            rejections: 0,
            total_calls: 0,
            last_failure_at: None,
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.forced_open = false;
        self.probe_in_flight = false;
        self.window.clear();
    }

    fn window_counts(&self) -> (u32, u32) {
        let calls = self.window.len() as u32;
        let failed = self.window.iter().filter(|(_, failed)| *failed).count() as u32;
        (calls, failed)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub state: CircuitState,
    pub forced_open: bool,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub window_calls: u32,
    pub window_failures: u32,
    pub error_rate_percent: f64,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub volume_threshold: u32,
    pub error_threshold_percent: u32,
    pub reset_timeout_ms: i64,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Run `call` unless the circuit is open. `Err` from the call counts as a
    /// failure, `Ok` as a success.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire(Utc::now()).ok_or(BreakerError::Open)?;
        let mut guard = CallGuard {
            breaker: self,
            permit,
            settled: false,
        };
        let outcome = call().await;
        guard.settle(outcome.is_ok());
        outcome.map_err(BreakerError::Inner)
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn force_open(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.trip(Utc::now());
        inner.forced_open = true;
        warn!("circuit {} forced open", self.name);
    }

    pub fn force_close(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.close();
        info!("circuit {} forced closed", self.name);
    }

    /// Zero the counters and the rolling window; the state is kept.
    pub fn reset_metrics(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.window.clear();
        inner.failures = 0;
        inner.successes = 0;
        inner.rejections = 0;
        inner.total_calls = 0;
        inner.last_failure_at = None;
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.prune(&mut inner, Utc::now());
        let (window_calls, window_failures) = inner.window_counts();
        let error_rate_percent = if window_calls == 0 {
            0.0
        } else {
            f64::from(window_failures) * 100.0 / f64::from(window_calls)
        };
        BreakerStats {
            state: inner.state,
            forced_open: inner.forced_open,
            total_calls: inner.total_calls,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
            window_calls,
            window_failures,
            error_rate_percent,
            opened_at: inner.opened_at,
            last_failure_at: inner.last_failure_at,
            volume_threshold: self.config.volume_threshold,
            error_threshold_percent: self.config.error_threshold_percent,
            reset_timeout_ms: self.config.reset_timeout.num_milliseconds(),
        }
    }

    fn prune(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let horizon = now - self.config.rolling_window;
        while inner.window.front().is_some_and(|(at, _)| *at < horizon) {
            inner.window.pop_front();
        }
    }

    fn acquire(&self, now: DateTime<Utc>) -> Option<Permit> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .is_some_and(|at| now >= at + self.config.reset_timeout);
                if elapsed && !inner.forced_open {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!("circuit {} half-open; letting one probe through", self.name);
                    Some(Permit::Probe)
                } else {
                    inner.rejections += 1;
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejections += 1;
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Permit::Probe)
                }
            }
        }
    }

    fn record(&self, now: DateTime<Utc>, permit: Permit, success: bool) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.total_calls += 1;
        if success {
            inner.successes += 1;
        } else {
            inner.failures += 1;
            inner.last_failure_at = Some(now);
        }
        inner.window.push_back((now, !success));
        self.prune(&mut inner, now);

        if permit == Permit::Probe && inner.state == CircuitState::HalfOpen {
            if success {
                inner.close();
                info!("circuit {} closed after successful probe", self.name);
            } else {
                inner.trip(now);
                warn!("circuit {} probe failed; reopening", self.name);
            }
            return;
        }

        if inner.state == CircuitState::Closed && !success {
            let (calls, failed) = inner.window_counts();
            if calls >= self.config.volume_threshold
                && failed * 100 >= self.config.error_threshold_percent * calls
            {
                inner.trip(now);
                warn!(
                    "circuit {} opened: {}/{} calls failed in rolling window",
                    self.name, failed, calls
                );
            }
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.probe_in_flight = false;
    }
}

// Records the outcome of one admitted call. A probe whose future is dropped
// before settling frees the probe slot so the next caller can try.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.record(Utc::now(), self.permit, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.permit == Permit::Probe {
            self.breaker.release_probe();
        }
    }
}
