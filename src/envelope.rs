use crate::lookup::LookupError;
use crate::rate_limit::RateLimitDecision;
use crate::types::LookupResult;
use serde_json::{Map, Value};

// HTTP-shaped payloads for route handlers sitting in front of the lookup.
// The JSON-RPC layer passes them through untouched, so a handler can copy
// status, headers and body straight onto its response.

fn header_object(pairs: Vec<(&'static str, String)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(name, value)| (header_case(name), Value::String(value)))
        .collect()
}

// "x-ratelimit-retry-after" -> "X-RateLimit-Retry-After"
fn header_case(name: &str) -> String {
    name.split('-')
        .map(|part| match part {
            "ratelimit" => "RateLimit".to_string(),
            other => {
                let mut chars = other.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Build `{status, headers?, body}`. Headers are dropped when empty.
pub fn http_envelope(status: u16, headers: Vec<(&'static str, String)>, body: Value) -> Value {
    let mut obj = serde_json::json!({
        "status": status,
        "body": body,
    });
    let headers = header_object(headers);
    if !headers.is_empty() {
        if let Some(map) = obj.as_object_mut() {
            map.insert("headers".to_string(), Value::Object(headers));
        }
    }
    obj
}

/// 200 envelope for a lookup; degraded results are still 200.
pub fn lookup_envelope(result: &LookupResult, decision: &RateLimitDecision) -> Value {
    let body = serde_json::to_value(result).unwrap_or(Value::Null);
    http_envelope(200, decision.headers(), body)
}

pub fn manual_envelope(result: &LookupResult) -> Value {
    let body = serde_json::to_value(result).unwrap_or(Value::Null);
    http_envelope(200, Vec::new(), body)
}

/// Envelope for the two errors a lookup raises: 400 or 429 with headers.
pub fn error_envelope(err: &LookupError) -> Value {
    let (code, headers, retry_after) = match err {
        LookupError::Validation(_) => ("invalid_plate", Vec::new(), None),
        LookupError::RateLimited { decision, .. } => (
            "rate_limited",
            decision.headers(),
            decision.retry_after_seconds,
        ),
    };
    let mut error = serde_json::json!({
        "code": code,
        "message": err.to_string(),
    });
    if let (Some(secs), Some(map)) = (retry_after, error.as_object_mut()) {
        map.insert("retryAfterSeconds".to_string(), Value::from(secs));
    }
    http_envelope(err.status_code(), headers, serde_json::json!({ "error": error }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::ValidationError;
    use chrono::Utc;

    fn decision(allowed: bool) -> RateLimitDecision {
        RateLimitDecision {
            allowed,
            current_count: 100,
            max_requests: 100,
            remaining_requests: 0,
            reset_time: Utc::now(),
            retry_after_seconds: if allowed { None } else { Some(42) },
            environment: "production".into(),
        }
    }

    #[test]
    fn header_names_are_canonical() {
        assert_eq!(header_case("x-ratelimit-limit"), "X-RateLimit-Limit");
        assert_eq!(header_case("x-ratelimit-retry-after"), "X-RateLimit-Retry-After");
    }

    #[test]
    fn rate_limited_envelope() {
        let err = LookupError::RateLimited {
            client_key: "1.2.3.4".into(),
            decision: decision(false),
        };
        let v = error_envelope(&err);
        assert_eq!(v["status"], 429);
        assert_eq!(v["headers"]["X-RateLimit-Remaining"], "0");
        assert_eq!(v["headers"]["X-RateLimit-Retry-After"], "42");
        assert_eq!(v["body"]["error"]["code"], "rate_limited");
        assert_eq!(v["body"]["error"]["retryAfterSeconds"], 42);
    }

    #[test]
    fn validation_envelope_has_no_headers() {
        let err = LookupError::Validation(ValidationError::InvalidPlate("X".into()));
        let v = error_envelope(&err);
        assert_eq!(v["status"], 400);
        assert!(v.get("headers").is_none());
        assert_eq!(v["body"]["error"]["code"], "invalid_plate");
    }
}
