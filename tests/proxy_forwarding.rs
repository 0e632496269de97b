//! End-to-end forwarding through the router against a fake backend.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, body::Body, extract::ConnectInfo, http::Request};
use game_gateway::{
    adapters::{AppState, BroadcastPublisher, HttpClientAdapter, create_router},
    config::{CircuitBreakerConfig, RetryConfig, ServerConfig, ServerConfigBuilder, ServiceConfig},
    core::GatewayService,
};
use http::StatusCode;
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

fn router(configure: impl FnOnce(ServerConfigBuilder) -> ServerConfigBuilder) -> Router {
    let config: ServerConfig = configure(ServerConfig::builder().retry(RetryConfig {
        base_delay_ms: 1,
    }))
    .build()
    .unwrap();
    let gateway = Arc::new(GatewayService::new(Arc::new(config)).unwrap());
    create_router(AppState::new(
        gateway,
        Arc::new(HttpClientAdapter::new().unwrap()),
        Arc::new(BroadcastPublisher::default()),
    ))
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn forwards_with_rewrite_and_filtered_headers() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/players/42/profile"))
        .and(query_param("fields", "level"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .insert_header("etag", "\"v1\"")
                .insert_header("set-cookie", "session=abc")
                .insert_header("x-internal-debug", "1")
                .set_body_string(r#"{"level":12}"#),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let app = router(|b| {
        b.service("player", ServiceConfig::new(backend.uri()))
            .prefix_rewrite("/api/v1/player", "/players")
            .trusted_proxy("10.0.0.2".parse().unwrap())
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/player/42/profile?fields=level")
                .extension(ConnectInfo("10.0.0.2:5000".parse::<SocketAddr>().unwrap()))
                .header("authorization", "Bearer token")
                .header("x-game-region", "eu-west")
                .header("cookie", "tracking=1")
                .header("x-forwarded-for", "203.0.113.9")
                .header("x-request-id", "req-fwd-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["etag"], "\"v1\"");
    assert_eq!(headers["content-type"], "application/json");
    assert!(!headers.contains_key("set-cookie"));
    assert!(!headers.contains_key("x-internal-debug"));
    assert_eq!(headers["x-request-id"], "req-fwd-1");
    assert_eq!(
        headers["x-gateway-service"],
        backend.uri().trim_start_matches("http://")
    );
    assert!(headers.contains_key("x-ratelimit-remaining"));
    assert_eq!(body_bytes(response).await, br#"{"level":12}"#);

    let received = backend.received_requests().await.unwrap();
    let upstream = &received[0].headers;
    assert_eq!(upstream["authorization"], "Bearer token");
    assert_eq!(upstream["x-game-region"], "eu-west");
    assert_eq!(upstream["x-forwarded-for"], "203.0.113.9");
    assert_eq!(upstream["x-forwarded-proto"], "http");
    assert_eq!(upstream["x-request-id"], "req-fwd-1");
    assert!(upstream.contains_key("x-gateway-version"));
    assert!(!upstream.contains_key("cookie"));
}

#[tokio::test]
async fn forwarded_for_from_untrusted_peer_is_replaced() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;

    let app = router(|b| b.service("player", ServiceConfig::new(backend.uri())));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/player/7")
                .header("x-forwarded-for", "10.9.9.9")
                .header("x-real-ip", "10.9.9.8")
                .extension(ConnectInfo("198.51.100.20:40000".parse::<SocketAddr>().unwrap()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received[0].headers["x-forwarded-for"], "198.51.100.20");
}

#[tokio::test]
async fn path_outside_api_prefix_gets_service_not_found() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let app = router(|b| b.service("chat", ServiceConfig::new(backend.uri())));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/chat/rooms")
                .header("x-request-id", "req-missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["error"], "Service not found");
    assert_eq!(json["request_id"], "req-missing");
}

#[tokio::test]
async fn permanent_failure_makes_exactly_retries_plus_one_attempts() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/combat/attack"))
        .respond_with(ResponseTemplate::new(500).set_body_string("stack trace"))
        .expect(3)
        .mount(&backend)
        .await;

    let app = router(|b| b.service("combat", ServiceConfig::new(backend.uri()).with_retries(2)));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/combat/attack")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"target":7}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("Upstream service unavailable"));
    assert!(!body.contains("stack trace"));

    // Every attempt replays the same body
    let received = backend.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|r| r.body == br#"{"target":7}"#));
}

#[tokio::test]
async fn client_errors_are_relayed_without_retry() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/inventory/items/999"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"detail":"no such item"}"#),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let app = router(|b| b.service("inventory", ServiceConfig::new(backend.uri())));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/inventory/items/999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await, br#"{"detail":"no such item"}"#);
}

#[tokio::test]
async fn open_circuit_short_circuits_calls() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&backend)
        .await;

    let app = router(|b| {
        b.service("guild", ServiceConfig::new(backend.uri()).with_retries(0))
            .circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown_secs: 60,
            })
    });

    let call = || {
        Request::builder()
            .uri("/api/v1/guild/roster")
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(app.clone().oneshot(call()).await.unwrap().status(), StatusCode::BAD_GATEWAY);
    assert_eq!(app.clone().oneshot(call()).await.unwrap().status(), StatusCode::BAD_GATEWAY);

    let rejected = app.clone().oneshot(call()).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(rejected.headers().contains_key("x-request-id"));

    let circuits = app
        .oneshot(
            Request::builder()
                .uri("/gateway/circuits")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(circuits).await).unwrap();
    assert_eq!(json["circuits"][0]["service"], "guild");
    assert_eq!(json["circuits"][0]["state"], "open");
}

#[tokio::test]
async fn slow_backend_times_out() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
        .mount(&backend)
        .await;

    let app = router(|b| {
        b.service(
            "world",
            ServiceConfig::new(backend.uri())
                .with_timeout("100ms")
                .with_retries(0),
        )
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/world/zones")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn oversized_body_is_rejected_before_forwarding() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let app = router(|b| {
        b.service("analytics", ServiceConfig::new(backend.uri()))
            .max_body_bytes(16)
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/analytics/events")
                .body(Body::from(vec![b'x'; 64]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn health_paths_map_to_service_health() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&backend)
        .await;

    let app = router(|b| b.service("chat", ServiceConfig::new(backend.uri())));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/chat/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"ok");
}
