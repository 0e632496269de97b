//! Request forwarding engine.
//!
//! A forwarded call goes through: breaker admission, path transformation,
//! body buffering (bounded), outbound header filtering, the retry policy with a
//! per-attempt deadline, and finally response header filtering. Exactly one
//! outcome per call is reported to the service's circuit breaker.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use thiserror::Error;
use tokio::time::timeout;
use tracing::Instrument;

use crate::{
    config::ServerConfig,
    core::{
        GatewayService,
        circuit_breaker::CircuitBreaker,
        header_policy::{self, X_FORWARDED_PROTO, X_GATEWAY_SERVICE},
        retry::Exhausted,
        service::ServiceEndpoint,
    },
    error::GatewayError,
    metrics::{self, BackendRequestTimer},
    ports::http_client::{HttpClient, HttpClientError},
    tracing_setup::create_backend_span,
};

/// Everything needed to (re)issue one forwarded call.
#[derive(Debug, Clone)]
pub struct ProxyCallContext {
    pub method: Method,
    pub original_path: String,
    pub query: Option<String>,
    /// Allowed inbound headers plus forwarding metadata.
    pub headers: HeaderMap,
    /// Replayed byte-identical on every attempt.
    pub body: Bytes,
    pub client_ip: String,
    pub request_id: String,
}

impl ProxyCallContext {
    /// Buffer the body (at most `max_body_bytes`) and capture what the
    /// outbound request needs.
    pub async fn from_request(
        req: Request<AxumBody>,
        peer: Option<SocketAddr>,
        request_id: &str,
        config: &ServerConfig,
    ) -> Result<Self, GatewayError> {
        let max_body_bytes = config.max_body_bytes;
        let (parts, body) = req.into_parts();

        let declared = parts
            .headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > max_body_bytes) {
            return Err(GatewayError::PayloadTooLarge {
                limit: max_body_bytes,
            });
        }

        let body = match Limited::new(body, max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(GatewayError::PayloadTooLarge {
                    limit: max_body_bytes,
                });
            }
            Err(e) => {
                return Err(GatewayError::BadRequest(format!(
                    "Failed to read request body: {e}"
                )));
            }
        };

        let client_ip = header_policy::client_ip(&parts.headers, peer, &config.trusted_proxies);
        let proto = parts
            .headers
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http")
            .to_string();

        let mut headers = header_policy::filter_request_headers(&parts.headers);
        header_policy::add_forwarding_headers(
            &mut headers,
            &client_ip,
            &proto,
            &config.gateway_version,
        );
        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert(header_policy::X_REQUEST_ID, value);
        }

        Ok(Self {
            method: parts.method,
            original_path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers,
            body,
            client_ip,
            request_id: request_id.to_string(),
        })
    }
}

/// Why a single attempt did not produce a relayable response.
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Transport(#[from] HttpClientError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("upstream answered {0}")]
    Status(StatusCode),
}

impl AttemptError {
    fn outcome(&self) -> String {
        match self {
            AttemptError::Transport(e) => e.kind().to_string(),
            AttemptError::Timeout(_) => "timeout".to_string(),
            AttemptError::Status(status) => status.as_u16().to_string(),
        }
    }
}

/// Holds a breaker admission until an outcome is reported. If the call is
/// dropped first (client went away), the admission is released instead.
struct BreakerAdmission {
    breaker: Arc<CircuitBreaker>,
    settled: bool,
}

impl BreakerAdmission {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerAdmission {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned();
        }
    }
}

#[derive(Clone)]
pub struct Forwarder {
    gateway: Arc<GatewayService>,
    client: Arc<dyn HttpClient>,
}

impl Forwarder {
    pub fn new(gateway: Arc<GatewayService>, client: Arc<dyn HttpClient>) -> Self {
        Self { gateway, client }
    }

    /// Resolve the target service of `req` and forward it. The breaker is
    /// consulted before the body is read.
    pub async fn proxy(
        &self,
        req: Request<AxumBody>,
        peer: Option<SocketAddr>,
        request_id: &str,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let path = req.uri().path().to_string();
        let endpoint = self
            .gateway
            .find_service(&path)
            .ok_or_else(|| GatewayError::ServiceNotFound(path.clone()))?;

        let admission = self.admit(endpoint, req.method()).await?;
        let ctx =
            ProxyCallContext::from_request(req, peer, request_id, self.gateway.config()).await?;

        let _in_flight = self.gateway.begin_request();
        self.forward_admitted(&ctx, endpoint, admission).await
    }

    pub async fn forward(
        &self,
        ctx: &ProxyCallContext,
        endpoint: &ServiceEndpoint,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let admission = self.admit(endpoint, &ctx.method).await?;
        self.forward_admitted(ctx, endpoint, admission).await
    }

    async fn admit(
        &self,
        endpoint: &ServiceEndpoint,
        method: &Method,
    ) -> Result<BreakerAdmission, GatewayError> {
        let breaker = self.gateway.breakers().get(&endpoint.name).await;
        if !breaker.can_execute() {
            tracing::warn!(service = %endpoint.name, "Circuit open, rejecting call");
            metrics::increment_backend_request_total(&endpoint.name, method.as_str(), "circuit_open");
            return Err(GatewayError::CircuitOpen {
                service: endpoint.name.clone(),
            });
        }
        Ok(BreakerAdmission {
            breaker,
            settled: false,
        })
    }

    async fn forward_admitted(
        &self,
        ctx: &ProxyCallContext,
        endpoint: &ServiceEndpoint,
        admission: BreakerAdmission,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let target_path = self.gateway.transform_path(&ctx.original_path);
        let target_url = endpoint.url.join(&target_path, ctx.query.as_deref());
        let policy = self.gateway.retry_policy(endpoint);
        let _timer = BackendRequestTimer::new(&endpoint.name, ctx.method.as_str());

        let result = policy
            .execute(|attempt| self.attempt(ctx, endpoint, &target_url, attempt))
            .await;

        match result {
            Ok(response) => {
                admission.success();
                metrics::increment_backend_request_total(
                    &endpoint.name,
                    ctx.method.as_str(),
                    response.status().as_str(),
                );
                Ok(relay(response, endpoint))
            }
            Err(Exhausted {
                attempts,
                last_error,
            }) => {
                admission.failure();
                metrics::increment_backend_request_total(
                    &endpoint.name,
                    ctx.method.as_str(),
                    &last_error.outcome(),
                );
                tracing::error!(
                    service = %endpoint.name,
                    url = %target_url,
                    attempts,
                    error = %last_error,
                    request_id = %ctx.request_id,
                    "Upstream call failed"
                );

                Err(match last_error {
                    AttemptError::Timeout(_) => GatewayError::UpstreamTimeout {
                        service: endpoint.name.clone(),
                        attempts,
                    },
                    other => GatewayError::Upstream {
                        service: endpoint.name.clone(),
                        attempts,
                        last_error: other.to_string(),
                    },
                })
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &ProxyCallContext,
        endpoint: &ServiceEndpoint,
        target_url: &str,
        attempt: u32,
    ) -> Result<Response<AxumBody>, AttemptError> {
        if attempt > 1 {
            metrics::increment_upstream_retry(&endpoint.name);
        }

        let mut req = Request::builder()
            .method(ctx.method.clone())
            .uri(target_url)
            .body(AxumBody::from(ctx.body.clone()))
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        *req.headers_mut() = ctx.headers.clone();

        let span = create_backend_span(target_url, ctx.method.as_str(), &ctx.original_path);
        span.record("attempt", attempt);
        let call_span = span.clone();

        async move {
            let response = match timeout(endpoint.timeout, self.client.send_request(req)).await {
                Err(_) => return Err(AttemptError::Timeout(endpoint.timeout)),
                Ok(Err(e)) => return Err(AttemptError::Transport(e)),
                Ok(Ok(response)) => response,
            };

            let status = response.status();
            call_span.record("http.status_code", status.as_u16());

            if status.is_server_error() {
                // Drain so the pooled connection can be reused.
                let _ = response.into_body().collect().await;
                return Err(AttemptError::Status(status));
            }
            Ok(response)
        }
        .instrument(span)
        .await
    }
}

/// Relay status and body unchanged, with only the allowed response headers.
fn relay(response: Response<AxumBody>, endpoint: &ServiceEndpoint) -> Response<AxumBody> {
    let (parts, body) = response.into_parts();

    let mut relayed = Response::new(body);
    *relayed.status_mut() = parts.status;
    *relayed.headers_mut() = header_policy::filter_response_headers(&parts.headers);
    if let Ok(value) = HeaderValue::from_str(endpoint.url.authority()) {
        relayed.headers_mut().insert(X_GATEWAY_SERVICE, value);
    }
    relayed
}
