use pecaja_lookup::config::Config;
use pecaja_lookup::http::{basic_auth_value, map_status_to_failure, plate_url};
use pecaja_lookup::plate::{normalize, Plate, PlateFormat};
use pecaja_lookup::types::FailureKind;
use reqwest::StatusCode;

#[test]
fn basic_auth_has_empty_password() {
    assert_eq!(basic_auth_value("test-key"), "Basic dGVzdC1rZXk6");
    assert_eq!(basic_auth_value(""), "Basic Og==");
}

#[test]
fn status_failure_mapping() {
    assert_eq!(map_status_to_failure(StatusCode::TOO_MANY_REQUESTS), FailureKind::RateLimit);
    assert_eq!(map_status_to_failure(StatusCode::NOT_FOUND), FailureKind::NotFound);
    assert_eq!(map_status_to_failure(StatusCode::BAD_GATEWAY), FailureKind::UpstreamError);
}

#[test]
fn plate_path_segment() {
    let cfg = Config::new("k", "https://api.example/consulta");
    let plate = Plate::parse("bra-2e19").unwrap();
    assert_eq!(plate.format(), PlateFormat::Mercosul);
    assert_eq!(plate_url(&cfg, plate.as_str()), "https://api.example/consulta/BRA2E19");
}

#[test]
fn normalization_is_idempotent_for_valid_plates() {
    for raw in ["abc1234", "ABC-1234", "abc 1d23", "XYZ9Z99"] {
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
        assert_eq!(Plate::parse(raw).unwrap().as_str(), once);
    }
}
