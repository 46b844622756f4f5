use chrono::Duration;
use httpmock::{Method::GET, MockServer};
use pecaja_lookup::circuit_breaker::CircuitState;
use pecaja_lookup::config::Config;
use pecaja_lookup::types::{Category, DataOrigin, FailureKind};
use pecaja_lookup::{LookupError, VehicleLookup};

const AUTH: &str = "Basic dGVzdC1rZXk6"; // base64("test-key:")

fn config_for(server: &MockServer) -> Config {
    let mut cfg = Config::new("test-key", server.url("/consulta"));
    cfg.timeout_secs = 1;
    cfg
}

fn gol_body() -> serde_json::Value {
    serde_json::json!({
        "placa": "ABC1234",
        "MARCA": "VW",
        "MODELO": "GOL 1.0",
        "ano": "2015",
        "anoModelo": "2016",
        "cor": "Prata",
        "chassi": "9BWAA05U0FP000001",
        "renavam": "00123456789",
        "segmento": "Auto"
    })
}

#[tokio::test]
async fn fresh_lookup_then_cache_hit() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/consulta/ABC1234")
                .header("authorization", AUTH);
            then.status(200).json_body(gol_body());
        })
        .await;

    let svc = VehicleLookup::from_config(config_for(&server)).unwrap();
    let first = svc.lookup("abc-1234", "10.0.0.1").await.unwrap();
    assert_eq!(first.data_origin, DataOrigin::Api);
    assert_eq!(first.plate.as_deref(), Some("ABC1234"));
    assert_eq!(first.make.as_deref(), Some("Volkswagen"));
    assert_eq!(first.model.as_deref(), Some("GOL 1.0"));
    assert_eq!(first.manufacture_year, Some(2015));
    assert_eq!(first.model_year, Some(2016));
    assert_eq!(first.category, Category::Carro);
    assert_eq!(first.metadata.api_version.as_deref(), Some("v2"));
    assert!(first.metadata.cache_hit_at.is_none());
    assert!(first.metadata.raw_origin.contains(&"shape:flat".to_string()));

    let second = svc.lookup("ABC1234", "10.0.0.1").await.unwrap();
    assert_eq!(second.data_origin, DataOrigin::Api);
    assert!(second.metadata.cache_hit_at.is_some());
    assert_eq!(second.metadata.request_id, first.metadata.request_id);
    assert_eq!(mock.hits_async().await, 1);

    let stats = svc.snapshot();
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.active_keys, 1);
    assert_eq!(stats.circuit_breaker.successes, 1);
}

#[tokio::test]
async fn nested_payload_maps_segment_to_category() {
    let server = MockServer::start_async().await;
    let _mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/BRA2E19");
            then.status(200).json_body(serde_json::json!({
                "placa": "bra-2e19",
                "dados_veiculo": {
                    "marca": "HONDA",
                    "modelo": "CG 160 FAN",
                    "anoFabricacao": 2021,
                    "anoModelo": 2022,
                    "segmento": "Motocicleta"
                }
            }));
        })
        .await;

    let svc = VehicleLookup::from_config(config_for(&server)).unwrap();
    let r = svc.lookup("bra 2e19", "10.0.0.1").await.unwrap();
    assert_eq!(r.data_origin, DataOrigin::Api);
    assert_eq!(r.make.as_deref(), Some("Honda"));
    assert_eq!(r.category, Category::Moto);
    assert_eq!(r.metadata.raw_origin[0], "shape:nested");
    assert!(r.metadata.raw_origin.contains(&"field:segmento".to_string()));
    // The plate beside the container is normalized before comparison.
    assert!(!r.metadata.raw_origin.contains(&"plate:mismatch".to_string()));
}

#[tokio::test]
async fn invalid_plate_never_reaches_upstream() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(200).json_body(gol_body());
        })
        .await;

    let svc = VehicleLookup::from_config(config_for(&server)).unwrap();
    for raw in ["", "AB-123", "ABCD1234", "123ABCD"] {
        let err = svc.lookup(raw, "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, LookupError::Validation(_)), "{} -> {:?}", raw, err);
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(mock.hits_async().await, 0);
    // Validation failures do not consume the client's quota.
    assert!(svc.rate_limit_status("10.0.0.1").is_none());
}

#[tokio::test]
async fn rate_limit_blocks_per_client() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/ABC1234");
            then.status(200).json_body(gol_body());
        })
        .await;

    let mut cfg = config_for(&server);
    cfg.rate_limit.max_requests = 2;
    cfg.rate_limit.environment = "production".into();
    let svc = VehicleLookup::from_config(cfg).unwrap();

    svc.lookup("ABC1234", "1.1.1.1").await.unwrap();
    svc.lookup("ABC1234", "1.1.1.1").await.unwrap();
    let err = svc.lookup("ABC1234", "1.1.1.1").await.unwrap_err();
    match &err {
        LookupError::RateLimited { client_key, decision } => {
            assert_eq!(client_key, "1.1.1.1");
            assert!(!decision.allowed);
            assert_eq!(decision.remaining_requests, 0);
            assert_eq!(decision.max_requests, 2);
            assert_eq!(decision.environment, "production");
            assert!(decision.retry_after_seconds.is_some());
        }
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert_eq!(err.status_code(), 429);

    assert!(svc.lookup("ABC1234", "2.2.2.2").await.is_ok());
    assert!(svc.clear_rate_limit("1.1.1.1"));
    assert!(svc.lookup("ABC1234", "1.1.1.1").await.is_ok());
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn upstream_statuses_become_classified_fallbacks() {
    let server = MockServer::start_async().await;
    let not_found = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/AAA1111");
            then.status(404).body("placa nao encontrada");
        })
        .await;
    let _throttled = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/BBB2222");
            then.status(429).body("slow down");
        })
        .await;
    let _html = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/CCC3333");
            then.status(200).body("<html>maintenance</html>");
        })
        .await;

    let svc = VehicleLookup::from_config(config_for(&server)).unwrap();

    let r = svc.lookup("AAA1111", "ip").await.unwrap();
    assert_eq!(r.data_origin, DataOrigin::ApiWithFallback);
    assert_eq!(r.plate.as_deref(), Some("AAA1111"));
    assert_eq!(r.metadata.failure.as_ref().unwrap().kind, FailureKind::NotFound);
    // Fallbacks are not cached.
    svc.lookup("AAA1111", "ip").await.unwrap();
    assert_eq!(not_found.hits_async().await, 2);

    let r = svc.lookup("BBB2222", "ip").await.unwrap();
    assert_eq!(r.metadata.failure.as_ref().unwrap().kind, FailureKind::RateLimit);

    let r = svc.lookup("CCC3333", "ip").await.unwrap();
    assert_eq!(r.data_origin, DataOrigin::ApiWithFallback);
    assert_eq!(
        r.metadata.failure.as_ref().unwrap().kind,
        FailureKind::MalformedResponse
    );

    // The 200 with a bad body counted as a breaker success.
    let stats = svc.breaker().stats();
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.successes, 1);
    assert_eq!(svc.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn slow_upstream_times_out_into_fallback() {
    let server = MockServer::start_async().await;
    let _slow = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/ABC1234");
            then.status(200)
                .json_body(gol_body())
                .delay(std::time::Duration::from_millis(2_500));
        })
        .await;

    let svc = VehicleLookup::from_config(config_for(&server)).unwrap();
    let r = svc.lookup("ABC1234", "ip").await.unwrap();
    assert_eq!(r.data_origin, DataOrigin::ApiWithFallback);
    assert_eq!(r.metadata.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert_eq!(svc.breaker().stats().failures, 1);
}

#[tokio::test]
async fn repeated_failures_open_breaker_and_skip_upstream() {
    let server = MockServer::start_async().await;
    let failing = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/ABC1234");
            then.status(500).body("boom");
        })
        .await;

    let svc = VehicleLookup::from_config(config_for(&server)).unwrap();
    for _ in 0..10 {
        let r = svc.lookup("ABC1234", "ip").await.unwrap();
        assert_eq!(r.metadata.failure.as_ref().unwrap().kind, FailureKind::UpstreamError);
    }
    assert_eq!(svc.breaker().state(), CircuitState::Open);
    assert_eq!(failing.hits_async().await, 10);

    let r = svc.lookup("ABC1234", "ip").await.unwrap();
    assert_ne!(r.data_origin, DataOrigin::Api);
    assert_eq!(r.metadata.failure.as_ref().unwrap().kind, FailureKind::CircuitOpen);
    assert_eq!(failing.hits_async().await, 10);
    assert_eq!(svc.snapshot().circuit_breaker.rejections, 1);
}

#[tokio::test]
async fn half_open_probe_recovers() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/ABC1234");
            then.status(503);
        })
        .await;

    let mut cfg = config_for(&server);
    cfg.breaker.volume_threshold = 2;
    cfg.breaker.reset_timeout = Duration::milliseconds(100);
    let svc = VehicleLookup::from_config(cfg).unwrap();

    svc.lookup("ABC1234", "ip").await.unwrap();
    svc.lookup("ABC1234", "ip").await.unwrap();
    assert_eq!(svc.breaker().state(), CircuitState::Open);

    failing.delete_async().await;
    let healthy = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/ABC1234");
            then.status(200).json_body(gol_body());
        })
        .await;

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let r = svc.lookup("ABC1234", "ip").await.unwrap();
    assert_eq!(r.data_origin, DataOrigin::Api);
    assert_eq!(svc.breaker().state(), CircuitState::Closed);
    assert_eq!(healthy.hits_async().await, 1);
}

#[tokio::test]
async fn admin_overrides() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/consulta/ABC1234");
            then.status(200).json_body(gol_body());
        })
        .await;

    let svc = VehicleLookup::from_config(config_for(&server)).unwrap();
    assert_eq!(svc.force_open(), CircuitState::Open);
    let r = svc.lookup("ABC1234", "ip").await.unwrap();
    assert_eq!(r.metadata.failure.as_ref().unwrap().kind, FailureKind::CircuitOpen);
    assert_eq!(mock.hits_async().await, 0);

    assert_eq!(svc.force_close(), CircuitState::Closed);
    let r = svc.lookup("ABC1234", "ip").await.unwrap();
    assert_eq!(r.data_origin, DataOrigin::Api);

    assert!(svc.invalidate("abc-1234"));
    assert!(!svc.invalidate("abc-1234"));
    svc.lookup("ABC1234", "ip").await.unwrap();
    assert_eq!(mock.hits_async().await, 2);

    let stats = svc.reset_metrics();
    assert_eq!(stats.total_calls, 0);
    assert_eq!(stats.state, CircuitState::Closed);
}
