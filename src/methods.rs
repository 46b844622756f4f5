use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "2025-01-15";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "paramsSchema")]
    pub params_schema: serde_json::Value,
}

fn descriptor(name: &str, description: &str, params_schema: serde_json::Value) -> MethodDescriptor {
    MethodDescriptor {
        name: name.into(),
        description: description.into(),
        params_schema,
    }
}

fn no_params() -> serde_json::Value {
    serde_json::json!({"type": "object", "additionalProperties": false, "properties": {}})
}

pub fn method_descriptors() -> Vec<MethodDescriptor> {
    let lookup = descriptor(
        "vehicle/lookup",
        "Resolve a plate (AAA9999 or AAA9A99) to vehicle data",
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "plate": {"type": "string"},
                "client_ip": {"type": "string"}
            },
            "required": ["plate"]
        }),
    );

    let manual = descriptor(
        "vehicle/manual",
        "Validate vehicle data typed in by a customer",
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "plate": {"type": "string"},
                "make": {"type": "string"},
                "model": {"type": "string"},
                "manufactureYear": {"type": ["integer", "string"]},
                "modelYear": {"type": ["integer", "string"]},
                "category": {"type": "string"},
                "color": {"type": "string"},
                "chassis": {"type": "string"},
                "registrationId": {"type": "string"}
            },
            "required": ["plate", "make", "model"]
        }),
    );

    let client_ip_only = serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {"client_ip": {"type": "string"}},
        "required": ["client_ip"]
    });

    vec![
        lookup,
        manual,
        descriptor("admin/stats", "Cache, rate limiter and circuit breaker statistics", no_params()),
        descriptor(
            "admin/rate_limit/status",
            "Current rate-limit window for a client IP",
            client_ip_only.clone(),
        ),
        descriptor("admin/rate_limit/clear", "Reset the rate limit for a client IP", client_ip_only),
        descriptor(
            "admin/cache/invalidate",
            "Drop the cached result for a plate",
            serde_json::json!({"type":"object","additionalProperties":false,"properties":{"plate":{"type":"string"}},"required":["plate"]}),
        ),
        descriptor("admin/breaker/force_open", "Force the upstream circuit open", no_params()),
        descriptor("admin/breaker/force_close", "Force the upstream circuit closed", no_params()),
        descriptor("admin/breaker/reset_metrics", "Zero circuit breaker counters", no_params()),
    ]
}

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub plate: String,
    pub client_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClientIpParams {
    pub client_ip: String,
}

#[derive(Debug, Deserialize)]
pub struct PlateParams {
    pub plate: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_unique_and_named() {
        let list = method_descriptors();
        let mut names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), list.len());
        assert!(names.contains(&"vehicle/lookup"));
        assert!(names.contains(&"admin/breaker/reset_metrics"));
    }
}
