use std::{sync::Arc, time::Duration};

use axum::{body::Body, http::Request};
use game_gateway::{
    adapters::{AppState, BroadcastPublisher, HttpClientAdapter, create_router},
    config::{HealthCheckConfig, ServerConfig, ServiceConfig},
    core::{GatewayService, ServiceStatus},
};
use http::StatusCode;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn backend(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn state(services: &[(&str, &MockServer)], unhealthy_threshold: u32) -> AppState {
    let mut builder = ServerConfig::builder().health_check(HealthCheckConfig {
        timeout_secs: 1,
        unhealthy_threshold,
        ..HealthCheckConfig::default()
    });
    for (name, server) in services {
        builder = builder.service(*name, ServiceConfig::new(server.uri()));
    }
    let gateway = Arc::new(GatewayService::new(Arc::new(builder.build().unwrap())).unwrap());
    AppState::new(
        gateway,
        Arc::new(HttpClientAdapter::new().unwrap()),
        Arc::new(BroadcastPublisher::default()),
    )
}

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = create_router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn status_reports_unhealthy_before_first_probe() {
    let player = backend(200).await;
    let state = state(&[("player", &player)], 3);

    let (status, json) = get_json(&state, "/gateway/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["services"]["healthy"], 0);
    assert_eq!(json["services"]["total"], 1);
}

#[tokio::test]
async fn cycle_marks_services_and_degrades_aggregate() {
    let player = backend(200).await;
    let world = backend(503).await;
    let state = state(&[("player", &player), ("world", &world)], 0);

    let results = state.health_monitor.run_cycle().await;
    assert_eq!(results.len(), 2);

    let registry = state.gateway.health();
    assert_eq!(registry.status("player"), Some(ServiceStatus::Healthy));
    assert_eq!(registry.status("world"), Some(ServiceStatus::Unhealthy));
    assert_eq!(registry.aggregate(), ServiceStatus::Degraded);

    let (status, json) = get_json(&state, "/gateway/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");

    let (_, all) = get_json(&state, "/gateway/health/all").await;
    let world_record = all["services"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "world")
        .unwrap();
    assert_eq!(world_record["status"], "unhealthy");
    assert_eq!(world_record["consecutive_errors"], 1);
}

#[tokio::test]
async fn failures_below_threshold_keep_previous_status() {
    let player = backend(200).await;
    let state = state(&[("player", &player)], 2);
    state.health_monitor.run_cycle().await;
    assert_eq!(
        state.gateway.health().status("player"),
        Some(ServiceStatus::Healthy)
    );

    player.reset().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&player)
        .await;

    for _ in 0..2 {
        state.health_monitor.run_cycle().await;
        assert_eq!(
            state.gateway.health().status("player"),
            Some(ServiceStatus::Healthy)
        );
    }

    state.health_monitor.run_cycle().await;
    assert_eq!(
        state.gateway.health().status("player"),
        Some(ServiceStatus::Unhealthy)
    );
}

#[tokio::test]
async fn probes_run_concurrently() {
    let mut servers = Vec::new();
    for _ in 0..3 {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(600)))
            .mount(&server)
            .await;
        servers.push(server);
    }
    let state = state(
        &[
            ("auth", &servers[0]),
            ("guild", &servers[1]),
            ("inventory", &servers[2]),
        ],
        3,
    );

    let started = std::time::Instant::now();
    let results = state.health_monitor.run_cycle().await;
    assert!(results.iter().all(|r| r.healthy));
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn services_endpoint_probes_without_touching_registry() {
    let chat = backend(200).await;
    let combat = backend(503).await;
    let state = state(&[("chat", &chat), ("combat", &combat)], 0);

    let (status, json) = get_json(&state, "/gateway/services").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["healthy"], 1);
    assert_eq!(json["total"], 2);

    let combat_probe = json["services"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["service"] == "combat")
        .unwrap();
    assert_eq!(combat_probe["healthy"], false);
    assert!(combat_probe["error"].as_str().unwrap().contains("503"));

    assert_eq!(
        state.gateway.health().status("chat"),
        Some(ServiceStatus::Unknown)
    );
}

#[tokio::test]
async fn background_loop_stops_on_cancel() {
    let auth = backend(200).await;
    let state = state(&[("auth", &auth)], 3);
    let token = CancellationToken::new();

    let handle = state.health_monitor.clone().start(token.clone());
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.gateway.health().status("auth") != Some(ServiceStatus::Healthy) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
