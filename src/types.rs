use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Canonical vehicle types shared by the lookup, cache and server layers.

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    Api,
    Manual,
    ApiWithFallback,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Carro,
    Moto,
    Caminhao,
    Van,
    Onibus,
    #[default]
    Outro,
}

/// Why a result was degraded to a fallback.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimit,
    Timeout,
    NotFound,
    Unauthorized,
    UpstreamError,
    MalformedResponse,
    CircuitOpen,
    Network,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LookupMetadata {
    pub request_id: Uuid,
    pub looked_up_at: DateTime<Utc>,
    pub api_version: Option<String>,
    pub source: String,
    /// Markers for the response shape and alternate field names the values came from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_origin: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit_at: Option<DateTime<Utc>>,
}

impl LookupMetadata {
    pub fn new(source: &str, api_version: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            looked_up_at: Utc::now(),
            api_version,
            source: source.to_string(),
            raw_origin: Vec::new(),
            failure: None,
            cache_hit_at: None,
        }
    }
}

/// Normalized vehicle attributes for one plate.
///
/// Built once per request; the cache keeps its own copy and hands out
/// annotated clones, so a value is never mutated after construction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LookupResult {
    pub plate: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub manufacture_year: Option<u16>,
    pub model_year: Option<u16>,
    pub category: Category,
    pub color: Option<String>,
    pub chassis: Option<String>,
    pub registration_id: Option<String>,
    pub data_origin: DataOrigin,
    pub metadata: LookupMetadata,
}

impl LookupResult {
    /// Best-effort result used when the upstream could not confirm the plate.
    /// Without any plate context the result is a blank manual form.
    pub fn fallback(plate: Option<&str>, failure: FailureInfo, api_version: Option<String>) -> Self {
        let data_origin = if plate.is_some() {
            DataOrigin::ApiWithFallback
        } else {
            DataOrigin::Manual
        };
        let mut metadata = LookupMetadata::new("fallback", api_version);
        metadata.failure = Some(failure);
        Self {
            plate: plate.map(str::to_string),
            make: None,
            model: None,
            manufacture_year: None,
            model_year: None,
            category: Category::Outro,
            color: None,
            chassis: None,
            registration_id: None,
            data_origin,
            metadata,
        }
    }

    /// Copy of this result marked as served from cache at `at`.
    pub fn with_cache_hit(&self, at: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.metadata.cache_hit_at = Some(at);
        copy
    }
}
