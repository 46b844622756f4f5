//! Plate lookup orchestration.
//!
//! ```text
//! lookup(plate, ip)
//!     → plate::Plate::parse      invalid        → Err(Validation)
//!     → RateLimiter::check       blocked        → Err(RateLimited)
//!     → LookupCache::get         hit            → cached copy + cacheHitAt
//!     → CircuitBreaker::execute(http::fetch_vehicle)
//!           ok + recognised body → dataOrigin=api, cached
//!           anything else        → fallback, dataOrigin=api_with_fallback
//! ```
//!
//! The upstream call runs in its own task so its outcome still reaches the
//! breaker and the cache when the caller stops waiting.

use crate::cache::{CacheStats, LookupCache};
use crate::circuit_breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitState};
use crate::config::Config;
use crate::http::{self, UpstreamError};
use crate::mapping::{self, ExtractedVehicle};
use crate::plate::{self, Plate, ValidationError};
use crate::rate_limit::{RateLimitDecision, RateLimitStatus, RateLimiter, RateLimiterStats};
use crate::types::{DataOrigin, FailureInfo, FailureKind, LookupMetadata, LookupResult};
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

const SOURCE: &str = "plate-api";

/// Errors that cross the lookup boundary. Upstream trouble never does.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rate limit exceeded for {client_key}")]
    RateLimited {
        client_key: String,
        decision: RateLimitDecision,
    },
}

impl LookupError {
    /// HTTP status a route handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            LookupError::Validation(_) => 400,
            LookupError::RateLimited { .. } => 429,
        }
    }
}

/// Vehicle data typed in by a customer when the plate API could not help.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualVehicle {
    pub plate: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub manufacture_year: Option<Value>,
    pub model_year: Option<Value>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub chassis: Option<String>,
    pub registration_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub rate_limiter: RateLimiterStats,
    pub circuit_breaker: BreakerStats,
}

#[derive(Clone)]
pub struct VehicleLookup {
    config: Arc<Config>,
    client: Client,
    cache: Arc<LookupCache>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl VehicleLookup {
    pub fn new(
        config: Config,
        client: Client,
        cache: Arc<LookupCache>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            client,
            cache,
            limiter,
            breaker,
        }
    }

    /// Build the HTTP client, cache, limiter and breaker from `config`.
    pub fn from_config(config: Config) -> reqwest::Result<Self> {
        let client = http::build_client(&config)?;
        let cache = Arc::new(LookupCache::new(config.cache_ttl));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let breaker = Arc::new(CircuitBreaker::new(SOURCE, config.breaker.clone()));
        Ok(Self::new(config, client, cache, limiter, breaker))
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn lookup(&self, raw_plate: &str, client_ip: &str) -> Result<LookupResult, LookupError> {
        self.lookup_with_limit(raw_plate, client_ip)
            .await
            .map(|(result, _)| result)
    }

    /// Like `lookup`, also returning the rate-limit decision for response headers.
    pub async fn lookup_with_limit(
        &self,
        raw_plate: &str,
        client_ip: &str,
    ) -> Result<(LookupResult, RateLimitDecision), LookupError> {
        let plate = Plate::parse(raw_plate)?;

        let decision = self.limiter.check(client_ip);
        if !decision.allowed {
            warn!("rate limit exceeded for {} ({} requests)", client_ip, decision.current_count);
            return Err(LookupError::RateLimited {
                client_key: client_ip.to_string(),
                decision,
            });
        }

        if let Some(cached) = self.cache.get(plate.as_str()) {
            debug!("cache hit for {}", plate);
            return Ok((cached.with_cache_hit(Utc::now()), decision));
        }

        let this = self.clone();
        let key = plate.clone();
        let task = tokio::spawn(async move { this.fetch_fresh(&key).await });
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!("lookup task for {} failed: {}", plate, e);
                self.fallback(
                    Some(&plate),
                    FailureKind::UpstreamError,
                    format!("lookup task failed: {}", e),
                )
            }
        };
        Ok((result, decision))
    }

    async fn fetch_fresh(&self, plate: &Plate) -> LookupResult {
        let client = &self.client;
        let config = &*self.config;
        let number = plate.as_str();
        let outcome = self
            .breaker
            .execute(move || http::fetch_vehicle(client, config, number))
            .await;

        let body = match outcome {
            Ok(body) => body,
            Err(BreakerError::Open) => {
                debug!("circuit open; fallback for {}", plate);
                return self.fallback(
                    Some(plate),
                    FailureKind::CircuitOpen,
                    "plate API temporarily unavailable".to_string(),
                );
            }
            Err(BreakerError::Inner(e)) => {
                warn!("plate API call for {} failed: {}", plate, e);
                return self.fallback(Some(plate), e.kind(), e.to_string());
            }
        };

        let extracted = http::parse_body(&body)
            .and_then(|v| mapping::extract_vehicle(&v).map_err(UpstreamError::Malformed));
        match extracted {
            Ok(vehicle) => {
                let result = self.api_result(plate, vehicle);
                self.cache.insert(plate.as_str(), result.clone());
                info!(
                    "resolved {} via plate API ({} {})",
                    plate,
                    result.make.as_deref().unwrap_or("?"),
                    result.model.as_deref().unwrap_or("?")
                );
                result
            }
            Err(e) => {
                warn!("unusable plate API payload for {}: {}", plate, e);
                self.fallback(Some(plate), e.kind(), e.to_string())
            }
        }
    }

    fn api_result(&self, plate: &Plate, vehicle: ExtractedVehicle) -> LookupResult {
        let mut metadata = LookupMetadata::new(SOURCE, Some(self.config.api_version.clone()));
        metadata.raw_origin = vehicle.markers;
        if vehicle.plate.as_deref().is_some_and(|p| p != plate.as_str()) {
            metadata.raw_origin.push("plate:mismatch".to_string());
        }
        LookupResult {
            plate: Some(plate.as_str().to_string()),
            make: vehicle.make,
            model: vehicle.model,
            manufacture_year: vehicle.manufacture_year,
            model_year: vehicle.model_year,
            category: vehicle.category,
            color: vehicle.color,
            chassis: vehicle.chassis,
            registration_id: vehicle.registration_id,
            data_origin: DataOrigin::Api,
            metadata,
        }
    }

    fn fallback(&self, plate: Option<&Plate>, kind: FailureKind, message: String) -> LookupResult {
        LookupResult::fallback(
            plate.map(Plate::as_str),
            FailureInfo { kind, message },
            Some(self.config.api_version.clone()),
        )
    }

    /// Validate customer-entered vehicle data. Not cached and not rate limited.
    pub fn manual_entry(&self, input: ManualVehicle) -> Result<LookupResult, LookupError> {
        let result = manual_result(input)?;
        info!("manual vehicle entry for {}", result.plate.as_deref().unwrap_or("?"));
        Ok(result)
    }

    pub fn snapshot(&self) -> ServiceStats {
        ServiceStats {
            cache: self.cache.stats(),
            rate_limiter: self.limiter.stats(),
            circuit_breaker: self.breaker.stats(),
        }
    }

    pub fn clear_rate_limit(&self, client_ip: &str) -> bool {
        let cleared = self.limiter.clear(client_ip);
        info!("rate limit cleared for {} (present={})", client_ip, cleared);
        cleared
    }

    pub fn rate_limit_status(&self, client_ip: &str) -> Option<RateLimitStatus> {
        self.limiter.stats_for(client_ip)
    }

    /// Drop the cached result for `raw_plate`, normalized first.
    pub fn invalidate(&self, raw_plate: &str) -> bool {
        self.cache.invalidate(&plate::normalize(raw_plate))
    }

    pub fn force_open(&self) -> CircuitState {
        self.breaker.force_open();
        self.breaker.state()
    }

    pub fn force_close(&self) -> CircuitState {
        self.breaker.force_close();
        self.breaker.state()
    }

    pub fn reset_metrics(&self) -> BreakerStats {
        self.breaker.reset_metrics();
        self.breaker.stats()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn strict_year(field: &'static str, value: Option<Value>) -> Result<Option<u16>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => mapping::parse_year_strict(field, &v).map(Some),
    }
}

fn manual_result(input: ManualVehicle) -> Result<LookupResult, ValidationError> {
    let plate = Plate::parse(&input.plate)?;
    let make = non_empty(input.make)
        .and_then(|m| mapping::extract_brand(Some(&Value::String(m))))
        .ok_or(ValidationError::MissingField("make"))?;
    let model = non_empty(input.model).ok_or(ValidationError::MissingField("model"))?;
    let manufacture_year = strict_year("manufactureYear", input.manufacture_year)?;
    let model_year = strict_year("modelYear", input.model_year)?;
    if let (Some(made), Some(model_year)) = (manufacture_year, model_year) {
        // A model year is the build year or the following one.
        if model_year < made || model_year > made + 1 {
            return Err(ValidationError::InvalidField {
                field: "modelYear",
                value: model_year.to_string(),
            });
        }
    }
    Ok(LookupResult {
        plate: Some(plate.as_str().to_string()),
        make: Some(make),
        model: Some(model),
        manufacture_year,
        model_year,
        category: mapping::map_category(input.category.as_deref()),
        color: non_empty(input.color),
        chassis: non_empty(input.chassis).map(|c| c.to_uppercase()),
        registration_id: non_empty(input.registration_id),
        data_origin: DataOrigin::Manual,
        metadata: LookupMetadata::new("manual", None),
    })
}
