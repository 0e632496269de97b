//! Cross-cutting Axum middleware for the gateway.
//!
//! Layer order on the router, outermost first: request id, request timing,
//! panic recovery, then rate limiting on the routes that need it. Every
//! middleware after the first can rely on the [`RequestId`] extension.
use std::{
    any::Any,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use tracing::Instrument;

use crate::{
    core::{GatewayService, RateLimitDecision, header_policy::X_REQUEST_ID, rate_limiter},
    error::GatewayError,
    metrics::{self, RequestTimer},
    tracing_setup::create_request_span,
};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of the current request, propagated from `X-Request-ID` or generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn of(req: &Request) -> String {
        req.extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default()
    }
}

fn incoming_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
}

/// Propagate or generate the request id, run the rest of the stack inside a
/// `request` span and echo the id on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id =
        incoming_request_id(req.headers()).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(X_REQUEST_ID, value);
    }
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
    let started = Instant::now();

    let mut response = next.run(req).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", started.elapsed().as_millis() as u64);

    if !response.headers().contains_key(X_REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
    }
    response
}

/// Log completion of a request and record the request metrics.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let _timer = RequestTimer::new(&route, method.as_str());

    let response = next.run(req).await;

    let status = response.status();
    metrics::increment_request_total(&route, method.as_str(), status.as_u16());
    tracing::info!(
        method = %method,
        route = %route,
        status = status.as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Turn a panic in the handler stack into a 500 carrying the request id.
pub async fn catch_panic_middleware(req: Request, next: Next) -> Response {
    let request_id = RequestId::of(&req);

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(request_id = %request_id, panic = %message, "Request handler panicked");
            GatewayError::Internal(message).into_response_with_id(&request_id)
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(unix_now().saturating_add(decision.reset_after_secs)),
    );
}

/// Per-client admission check. Admitted responses carry the `X-RateLimit-*`
/// headers; rejections are a 429 with `Retry-After`.
pub async fn rate_limit_middleware(
    State(gateway): State<Arc<GatewayService>>,
    req: Request,
    next: Next,
) -> Response {
    let limiter = gateway.rate_limiter();
    if !limiter.is_enabled() {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = rate_limiter::resolve_client_key(
        req.headers(),
        peer,
        &gateway.config().trusted_proxies,
    );
    let decision = limiter.allow(&key).await;

    if !decision.allowed {
        metrics::increment_rate_limited();
        let request_id = RequestId::of(&req);
        let mut response = GatewayError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        }
        .into_response_with_id(&request_id);
        apply_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(req).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}
