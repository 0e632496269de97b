//! HTTP frontend: gateway endpoints, the forwarded API surface and the
//! WebSocket upgrade, composed into one Axum router.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Request, State, WebSocketUpgrade},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        forwarder::Forwarder,
        health_monitor::HealthMonitor,
        middleware::{
            RequestId, catch_panic_middleware, rate_limit_middleware, request_id_middleware,
            request_timing_middleware,
        },
        websocket_hub::WebSocketHub,
    },
    core::{GatewayService, ServiceStatus, header_policy::X_REQUEST_ID},
    error::GatewayError,
    ports::{http_client::HttpClient, publisher::MessagePublisher},
};

const GATEWAY_NAME: &str = env!("CARGO_PKG_NAME");

/// Shared handles available to every handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayService>,
    pub forwarder: Forwarder,
    pub health_monitor: HealthMonitor,
    pub hub: Arc<WebSocketHub>,
}

impl AppState {
    pub fn new(
        gateway: Arc<GatewayService>,
        http_client: Arc<dyn HttpClient>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        let hub = Arc::new(WebSocketHub::new(
            gateway.config().websocket.clone(),
            publisher,
        ));
        Self {
            forwarder: Forwarder::new(gateway.clone(), http_client.clone()),
            health_monitor: HealthMonitor::new(gateway.clone(), http_client),
            hub,
            gateway,
        }
    }
}

/// Build the full router. Rate limiting applies to the forwarded API and the
/// WebSocket upgrade only; gateway endpoints stay reachable for operators.
pub fn create_router(state: AppState) -> Router {
    let config = state.gateway.config();
    let api_route = format!("{}/{{*rest}}", config.api_prefix.trim_end_matches('/'));

    let mut limited = Router::new().route(&api_route, any(proxy_handler));
    if config.websocket.enabled {
        limited = limited.route("/ws", get(websocket_handler));
    }
    let limited = limited.route_layer(middleware::from_fn_with_state(
        state.gateway.clone(),
        rate_limit_middleware,
    ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/gateway/status", get(status_handler))
        .route("/gateway/services", get(services_handler))
        .route("/gateway/health/all", get(health_all_handler))
        .route("/gateway/version", get(version_handler))
        .route("/gateway/info", get(info_handler))
        .route("/gateway/reload", post(reload_handler))
        .route("/gateway/circuits", get(circuits_handler))
        .merge(limited)
        .fallback(not_found_handler)
        .with_state(state)
        .layer(middleware::from_fn(catch_panic_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(middleware::from_fn(request_id_middleware))
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Liveness of the gateway process itself.
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": GATEWAY_NAME,
        "version": state.gateway.config().gateway_version,
        "uptime_secs": state.gateway.uptime().as_secs(),
        "timestamp": timestamp(),
    }))
}

/// Aggregate backend health plus gateway runtime counters.
async fn status_handler(State(state): State<AppState>) -> Response {
    let gateway = &state.gateway;
    let registry = gateway.health();
    let aggregate = registry.aggregate();

    let status = if aggregate == ServiceStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = json!({
        "status": aggregate,
        "services": {
            "healthy": registry.healthy_count(),
            "total": registry.len(),
        },
        "in_flight_requests": gateway.in_flight(),
        "websocket_connections": state.hub.connection_count().await,
        "rate_limit_buckets": gateway.rate_limiter().bucket_count(),
        "reload_count": gateway.reload_count(),
        "uptime_secs": gateway.uptime().as_secs(),
        "timestamp": timestamp(),
    });

    (status, Json(body)).into_response()
}

/// Probe every service now, bypassing the cached registry.
async fn services_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let monitor = &state.health_monitor;
    let results = join_all(state.gateway.endpoints().iter().map(|e| monitor.probe(e))).await;
    let healthy = results.iter().filter(|r| r.healthy).count();

    Json(json!({
        "services": results,
        "healthy": healthy,
        "total": results.len(),
        "timestamp": timestamp(),
    }))
}

/// Every health record as last observed by the background monitor.
async fn health_all_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.gateway.health();
    Json(json!({
        "status": registry.aggregate(),
        "services": registry.snapshot(),
        "timestamp": timestamp(),
    }))
}

async fn version_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": GATEWAY_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "gateway_version": state.gateway.config().gateway_version,
    }))
}

async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let gateway = &state.gateway;
    let config = gateway.config();

    let services: Vec<_> = gateway
        .endpoints()
        .iter()
        .map(|e| {
            json!({
                "name": e.name,
                "url": e.url.as_str(),
                "route_prefix": e.route_prefix,
                "timeout_ms": e.timeout.as_millis() as u64,
                "max_retries": e.max_retries,
            })
        })
        .collect();

    Json(json!({
        "name": GATEWAY_NAME,
        "version": config.gateway_version,
        "api_prefix": config.api_prefix,
        "started_at": DateTime::<Utc>::from(gateway.started_at()).to_rfc3339(),
        "services": services,
        "features": {
            "rate_limit": config.rate_limit.enabled,
            "adaptive_rate_limit": config.rate_limit.adaptive.is_some(),
            "health_check": config.health_check.enabled,
            "websocket": config.websocket.enabled,
        },
    }))
}

/// Records the request only; configuration is not swapped at runtime.
async fn reload_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let count = state.gateway.bump_reload();
    tracing::info!(reload_count = count, "Configuration reload requested");
    Json(json!({
        "status": "reload_requested",
        "reload_count": count,
        "timestamp": timestamp(),
    }))
}

async fn circuits_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "circuits": state.gateway.breakers().snapshot().await,
        "timestamp": timestamp(),
    }))
}

/// Paths no route or service prefix claims.
async fn not_found_handler(req: Request<AxumBody>) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let path = req.uri().path().to_string();
    tracing::warn!(path = %path, "No route for request");
    GatewayError::ServiceNotFound(path).into_response_with_id(&request_id)
}

async fn proxy_handler(State(state): State<AppState>, req: Request<AxumBody>) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    match state.forwarder.proxy(req, peer, &request_id).await {
        Ok(mut response) => {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(X_REQUEST_ID, value);
            }
            response
        }
        Err(e) => {
            if e.is_client_error() {
                tracing::warn!(error = %e, "Request rejected");
            } else {
                tracing::error!(error = %e, "Request failed");
            }
            e.into_response_with_id(&request_id)
        }
    }
}

async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.handle_socket(socket))
}
