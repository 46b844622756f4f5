use crate::envelope;
use crate::lookup::{LookupError, ManualVehicle, VehicleLookup};
use crate::methods::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const RATE_LIMITED: i64 = -32029;
const DEFAULT_CLIENT_IP: &str = "127.0.0.1";

// Minimal JSON-RPC 2.0 types
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Id {
    Str(String),
    Num(i64),
    Null,
}

#[derive(Debug, Serialize, Deserialize)]
struct Request {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Response {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

fn rpc_error(id: Option<Id>, code: i64, message: &str, data: Option<Value>) -> Response {
    Response { jsonrpc: "2.0".into(), result: None, error: Some(RpcError { code, message: message.into(), data }), id }
}

fn rpc_ok(id: Option<Id>, result: Value) -> Response {
    Response { jsonrpc: "2.0".into(), result: Some(result), error: None, id }
}

/// The lookup service, or the reason it could not be configured. Methods that
/// need the service report the reason; `initialize` and `methods/list` work
/// either way.
pub type Service = Result<VehicleLookup, String>;

/// Serve newline-delimited JSON-RPC requests from stdin until EOF.
pub async fn run_stdio_server(service: Service) -> anyhow::Result<()> {
    info!("Starting pecaja-lookup stdio server; protocol={}", PROTOCOL_VERSION);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if let Some(payload) = handle_line(&service, &line).await {
            out.write_all(payload.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
    }
    info!("stdin closed; shutting down");
    Ok(())
}

/// Handle one request line; `None` for blank lines.
pub async fn handle_line(service: &Service, line: &str) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }
    let resp = match serde_json::from_str::<Request>(line) {
        Ok(req) => {
            debug!("Received method={}", req.method);
            dispatch(service, req).await
        }
        Err(e) => rpc_error(None, -32700, &format!("Parse error: {}", e), None),
    };
    Some(serde_json::to_string(&resp).unwrap_or_else(|e| {
        format!(
            "{{\"jsonrpc\":\"2.0\",\"error\":{{\"code\":-32603,\"message\":\"{}\"}},\"id\":null}}",
            e
        )
    }))
}

async fn dispatch(service: &Service, req: Request) -> Response {
    match req.method.as_str() {
        "initialize" => return handle_initialize(req.id),
        "methods/list" => return handle_methods_list(req.id),
        "ping" => return rpc_ok(req.id, serde_json::json!({ "message": "pong" })),
        _ => {}
    }
    let svc = match service {
        Ok(svc) => svc,
        Err(e) => return rpc_error(req.id, -32603, e, None),
    };
    match req.method.as_str() {
        "vehicle/lookup" => handle_lookup(svc, req.id, req.params).await,
        "vehicle/manual" => handle_manual(svc, req.id, req.params),
        "admin/stats" => to_result(req.id, &svc.snapshot()),
        "admin/rate_limit/status" => {
            with_params(req.id, req.params, |id, p: ClientIpParams| {
                let status = svc.rate_limit_status(&p.client_ip);
                rpc_ok(id, serde_json::json!({ "clientIp": p.client_ip, "status": status }))
            })
        }
        "admin/rate_limit/clear" => {
            with_params(req.id, req.params, |id, p: ClientIpParams| {
                let cleared = svc.clear_rate_limit(&p.client_ip);
                rpc_ok(id, serde_json::json!({ "clientIp": p.client_ip, "cleared": cleared }))
            })
        }
        "admin/cache/invalidate" => with_params(req.id, req.params, |id, p: PlateParams| {
            let invalidated = svc.invalidate(&p.plate);
            rpc_ok(id, serde_json::json!({ "invalidated": invalidated }))
        }),
        "admin/breaker/force_open" => rpc_ok(req.id, serde_json::json!({ "state": svc.force_open() })),
        "admin/breaker/force_close" => rpc_ok(req.id, serde_json::json!({ "state": svc.force_close() })),
        "admin/breaker/reset_metrics" => to_result(req.id, &svc.reset_metrics()),
        other => rpc_error(req.id, -32601, &format!("Method not found: {}", other), None),
    }
}

fn to_result<T: Serialize>(id: Option<Id>, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(v) => rpc_ok(id, v),
        Err(e) => rpc_error(id, -32603, &e.to_string(), None),
    }
}

fn with_params<P, F>(id: Option<Id>, params: Value, f: F) -> Response
where
    P: for<'de> Deserialize<'de>,
    F: FnOnce(Option<Id>, P) -> Response,
{
    match serde_json::from_value::<P>(params) {
        Ok(p) => f(id, p),
        Err(e) => rpc_error(id, -32602, &format!("Invalid params: {}", e), None),
    }
}

fn handle_initialize(id: Option<Id>) -> Response {
    rpc_ok(
        id,
        serde_json::json!({
            "server": {
                "name": "pecaja-lookup",
                "version": env!("CARGO_PKG_VERSION"),
                "protocol": PROTOCOL_VERSION,
            }
        }),
    )
}

fn handle_methods_list(id: Option<Id>) -> Response {
    let methods = method_descriptors();
    rpc_ok(id, serde_json::json!({ "methods": methods }))
}

fn lookup_error(id: Option<Id>, err: &LookupError) -> Response {
    let code = match err {
        LookupError::Validation(_) => -32602,
        LookupError::RateLimited { .. } => RATE_LIMITED,
    };
    rpc_error(id, code, &err.to_string(), Some(envelope::error_envelope(err)))
}

async fn handle_lookup(svc: &VehicleLookup, id: Option<Id>, params: Value) -> Response {
    let input: LookupParams = match serde_json::from_value(params) {
        Ok(v) => v,
        Err(e) => return rpc_error(id, -32602, &format!("Invalid params: {}", e), None),
    };
    let client_ip = input.client_ip.as_deref().unwrap_or(DEFAULT_CLIENT_IP);
    match svc.lookup_with_limit(&input.plate, client_ip).await {
        Ok((result, decision)) => rpc_ok(id, envelope::lookup_envelope(&result, &decision)),
        Err(e) => lookup_error(id, &e),
    }
}

fn handle_manual(svc: &VehicleLookup, id: Option<Id>, params: Value) -> Response {
    let input: ManualVehicle = match serde_json::from_value(params) {
        Ok(v) => v,
        Err(e) => return rpc_error(id, -32602, &format!("Invalid params: {}", e), None),
    };
    match svc.manual_entry(input) {
        Ok(result) => rpc_ok(id, envelope::manual_envelope(&result)),
        Err(e) => lookup_error(id, &e),
    }
}
