//! End-to-end pipeline tests against mocked upstream feeds.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fieldwatch::alerts::AlertCondition;
use fieldwatch::build_runner;
use fieldwatch::config::AppConfig;
use fieldwatch::geo::{Point, Polygon};
use fieldwatch::handlers::AppState;
use fieldwatch::storage::Storage;
use fieldwatch::models::{
    AlertKind, AlertSeverity, CropType, FieldRecord, FireRiskLevel, HealthStatus, ScoreBasis,
};
use fieldwatch::runner::{BatchRunner, TaskKind};
use fieldwatch::server::build_router;
use fieldwatch::storage::InMemoryStorage;

/// Half-degree square with an exactly representable centroid, so mocks can
/// match on the longitude query parameter.
fn square(origin_lon: f64) -> Polygon {
    Polygon::new(vec![
        Point::new(origin_lon, 0.0),
        Point::new(origin_lon + 0.5, 0.0),
        Point::new(origin_lon + 0.5, 0.5),
        Point::new(origin_lon, 0.5),
    ])
    .unwrap()
}

fn field(origin_lon: f64) -> FieldRecord {
    FieldRecord {
        id: Uuid::new_v4(),
        name: format!("field-{origin_lon}"),
        boundary: Some(square(origin_lon)),
        crop_type: CropType::Wheat,
        planting_date: None,
        active: true,
    }
}

fn test_config(server_uri: &str, extra: Vec<(&'static str, &'static str)>) -> AppConfig {
    let base = format!("{server_uri}/");
    AppConfig::from_lookup(move |key| {
        let suffix = key.strip_prefix("FIELDWATCH_")?;
        if let Some((_, value)) = extra.iter().find(|(k, _)| *k == suffix) {
            return Some(value.to_string());
        }
        match suffix {
            "WEATHER_BASE_URL" | "VEGETATION_BASE_URL" | "FIRE_BASE_URL" => Some(base.clone()),
            "FIRMS_API_KEY" => Some("testkey".to_string()),
            "RETRY_BASE_SECONDS" => Some("0".to_string()),
            "RETRY_JITTER_FACTOR" => Some("0".to_string()),
            _ => None,
        }
    })
    .expect("test config")
}

async fn runner_for(
    config: &AppConfig,
    fields: &[FieldRecord],
) -> (Arc<InMemoryStorage>, Arc<BatchRunner>) {
    let storage = Arc::new(InMemoryStorage::new());
    for f in fields {
        storage.add_field(f.clone()).await;
    }
    let runner = build_runner(config, storage.clone()).expect("runner");
    (storage, runner)
}

/// Daily point weather body covering the last three days with mild values.
fn power_body() -> serde_json::Value {
    let today = Utc::now().date_naive();
    let mut series = serde_json::Map::new();
    for name in [
        "T2M",
        "T2M_MAX",
        "T2M_MIN",
        "RH2M",
        "PRECTOTCORR",
        "WS2M",
        "ALLSKY_SFC_SW_DWN",
    ] {
        let mut days = serde_json::Map::new();
        for offset in 0..3 {
            let date = today - Duration::days(offset);
            let value = match name {
                "T2M_MAX" => 24.0,
                "T2M_MIN" => 12.0,
                "PRECTOTCORR" => 1.5,
                "RH2M" => 60.0,
                "WS2M" => 3.0,
                "ALLSKY_SFC_SW_DWN" => 20.0,
                _ => 18.0,
            };
            days.insert(date.format("%Y%m%d").to_string(), json!(value));
        }
        series.insert(name.to_string(), serde_json::Value::Object(days));
    }
    json!({ "properties": { "parameter": series } })
}

fn modis_body(ndvi_raw: i64) -> serde_json::Value {
    let today = Utc::now().date_naive();
    json!({
        "subset": [{
            "calendar_date": today.format("%Y-%m-%d").to_string(),
            "band": "250m_16_days_NDVI",
            "data": [ndvi_raw, ndvi_raw]
        }]
    })
}

/// FIRMS CSV with hotspots east of the square at the given distances (km).
fn firms_csv(east_edge_lon: f64, distances_km: &[f64]) -> String {
    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let mut csv =
        String::from("latitude,longitude,brightness,acq_date,acq_time,confidence,frp\n");
    for km in distances_km {
        let lon = east_edge_lon + km / 111.0;
        csv.push_str(&format!("0.25,{lon:.6},330.0,{today},1200,80,10.0\n"));
    }
    csv
}

#[tokio::test]
async fn strong_ndvi_scores_excellent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MOD13Q1/subset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(modis_body(8200)))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), vec![]);
    let f = field(0.0);
    let (storage, runner) = runner_for(&config, &[f.clone()]).await;

    let result = runner
        .run_batch(vec![f.clone()], TaskKind::HealthRefresh, false)
        .await;
    assert_eq!(result.succeeded, vec![f.id]);

    let score = storage.latest_health_score(f.id).await.expect("score");
    assert!((score.score - 91.0).abs() < 1e-6, "score was {}", score.score);
    assert_eq!(score.status, HealthStatus::Excellent);
    assert_eq!(score.basis, ScoreBasis::VegetationAndWeather);
    assert!(storage.alerts_for_field(f.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn no_observations_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MOD13Q1/subset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "subset": [] })))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), vec![]);
    let f = field(0.0);
    let (storage, runner) = runner_for(&config, &[f.clone()]).await;

    let result = runner
        .run_batch(vec![f.clone()], TaskKind::HealthRefresh, false)
        .await;

    // Too little data is a normal outcome, not a failure.
    assert_eq!(result.succeeded, vec![f.id]);
    assert!(storage.latest_health_score(f.id).await.is_none());
    assert!(storage.alerts_for_field(f.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn fire_escalation_reopens_alert_at_higher_severity() {
    let server = MockServer::start().await;
    let east_edge = 0.5;

    // First check: two hotspots about 1.5 km out, a moderate situation.
    Mock::given(method("GET"))
        .and(path_regex("^/api/area/csv/testkey/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(firms_csv(east_edge, &[1.5, 1.8])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Second check: four hotspots, the nearest 300 m from the boundary.
    Mock::given(method("GET"))
        .and(path_regex("^/api/area/csv/testkey/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(firms_csv(east_edge, &[0.3, 3.0, 3.5, 4.0])),
        )
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), vec![]);
    let f = field(0.0);
    let (storage, runner) = runner_for(&config, &[f.clone()]).await;

    runner
        .run_batch(vec![f.clone()], TaskKind::FireCheck, false)
        .await;
    let risk = storage.latest_fire_risk(f.id).await.expect("risk");
    assert_eq!(risk.risk_level, FireRiskLevel::Moderate);
    let alerts = storage.alerts_for_field(f.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    assert!(alerts[0].is_open());

    // Force bypasses the fire cache window.
    runner
        .run_batch(vec![f.clone()], TaskKind::FireCheck, true)
        .await;
    let risk = storage.latest_fire_risk(f.id).await.expect("risk");
    assert_eq!(risk.risk_level, FireRiskLevel::High);
    let nearest = risk.nearest_distance_km.expect("nearest");
    assert!((nearest - 0.3).abs() < 0.05, "nearest was {nearest}");

    // The moderate alert was resolved and a fresh high one opened.
    let alerts = storage.alerts_for_field(f.id).await.unwrap();
    assert_eq!(alerts.len(), 2);
    let resolved: Vec<_> = alerts.iter().filter(|a| !a.is_open()).collect();
    let open: Vec<_> = alerts.iter().filter(|a| a.is_open()).collect();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].severity, AlertSeverity::Medium);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, AlertSeverity::High);
    assert_eq!(open[0].dedup_key, resolved[0].dedup_key);
    assert_ne!(open[0].id, resolved[0].id);
}

#[tokio::test]
async fn upstream_timeout_only_fails_that_field() {
    let server = MockServer::start().await;
    // Field A's centroid longitude times out; field B answers normally.
    Mock::given(method("GET"))
        .and(path("/api/temporal/daily/point"))
        .and(query_param("longitude", "0.25"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(power_body())
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/temporal/daily/point"))
        .and(query_param("longitude", "1.25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(power_body()))
        .mount(&server)
        .await;

    let config = test_config(
        &server.uri(),
        vec![
            ("REQUEST_TIMEOUT_SECONDS", "1"),
            ("RETRY_MAX_ATTEMPTS", "1"),
        ],
    );
    let field_a = field(0.0);
    let field_b = field(1.0);
    let (storage, runner) = runner_for(&config, &[field_a.clone(), field_b.clone()]).await;

    let result = runner
        .run_batch(
            vec![field_a.clone(), field_b.clone()],
            TaskKind::WeatherRefresh,
            false,
        )
        .await;

    assert_eq!(result.succeeded, vec![field_b.id]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].field_id, field_a.id);
    assert_eq!(result.failed[0].class, "transient");
    assert!(result.not_attempted.is_empty());

    // B's pipeline ran to completion: mild weather with no vegetation sample
    // yields no score, and nothing alerted.
    assert!(storage.latest_health_score(field_b.id).await.is_none());
    assert!(storage.alerts_for_field(field_b.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn rerun_within_cache_window_calls_upstream_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/temporal/daily/point"))
        .respond_with(ResponseTemplate::new(200).set_body_json(power_body()))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), vec![]);
    let f = field(0.0);
    let (_storage, runner) = runner_for(&config, &[f.clone()]).await;

    for _ in 0..2 {
        let result = runner
            .run_batch(vec![f.clone()], TaskKind::WeatherRefresh, false)
            .await;
        assert_eq!(result.succeeded, vec![f.id]);
    }
    // Mock expectation (exactly one upstream call) is verified on drop.
}

#[tokio::test]
async fn severe_heat_opens_weather_alert() {
    let server = MockServer::start().await;
    let today = Utc::now().date_naive();
    let mut body = power_body();
    // Push one day's maximum far beyond the wheat band.
    let key = today.format("%Y%m%d").to_string();
    body["properties"]["parameter"]["T2M_MAX"][key.as_str()] = json!(39.0);
    Mock::given(method("GET"))
        .and(path("/api/temporal/daily/point"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), vec![]);
    let f = field(0.0);
    let (storage, runner) = runner_for(&config, &[f.clone()]).await;

    runner
        .run_batch(vec![f.clone()], TaskKind::WeatherRefresh, false)
        .await;

    let alerts = storage.alerts_for_field(f.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Weather);
    assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    assert_eq!(alerts[0].dedup_key, "heat_stress");
}

#[tokio::test]
async fn http_surface_triggers_tasks_and_resolves_alerts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/temporal/daily/point"))
        .respond_with(ResponseTemplate::new(200).set_body_json(power_body()))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), vec![]);
    let f = field(0.0);
    let (_storage, runner) = runner_for(&config, &[f.clone()]).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(AppState {
        runner: runner.clone(),
    });
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    let trigger: serde_json::Value = client
        .post(format!("http://{addr}/fields/{}/tasks/weather", f.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trigger["succeeded"][0], json!(f.id.to_string()));

    let unknown = client
        .post(format!(
            "http://{addr}/fields/{}/tasks/weather",
            Uuid::new_v4()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);

    let bad_task = client
        .post(format!("http://{addr}/fields/{}/tasks/plough", f.id))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_task.status(), 400);

    // Raise an alert directly, then resolve it over the API.
    runner
        .pipeline()
        .alerts()
        .raise(AlertCondition {
            field_id: f.id,
            kind: AlertKind::Fire,
            severity: AlertSeverity::High,
            dedup_key: "fire_hotspots_near_boundary".to_string(),
            title: "Fire detected near field".to_string(),
        })
        .await
        .unwrap();

    let alerts: Vec<serde_json::Value> = client
        .get(format!("http://{addr}/fields/{}/alerts", f.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    let alert_id = alerts[0]["id"].as_str().unwrap().to_string();

    let resolved: serde_json::Value = client
        .post(format!("http://{addr}/alerts/{alert_id}/resolve"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!resolved["resolved_at"].is_null());

    let alerts: Vec<serde_json::Value> = client
        .get(format!("http://{addr}/fields/{}/alerts", f.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!alerts[0]["resolved_at"].is_null());
}
