//! Client-facing error taxonomy.
//!
//! Every rejection the gateway produces on its own (as opposed to relaying a
//! backend response) is a [`GatewayError`]. Rendering never includes upstream
//! bodies or internal details; the full context goes to the logs.
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("No service registered for path {0}")]
    ServiceNotFound(String),

    /// Transport failure or 5xx after all retries
    #[error("Upstream {service} failed after {attempts} attempt(s): {last_error}")]
    Upstream {
        service: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Upstream {service} timed out after {attempts} attempt(s)")]
    UpstreamTimeout { service: String, attempts: u32 },

    #[error("Circuit open for {service}")]
    CircuitOpen { service: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body of every gateway-generated error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub request_id: String,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::RateLimited { .. } => "Rate limit exceeded".to_string(),
            GatewayError::BadRequest(reason) => reason.clone(),
            GatewayError::PayloadTooLarge { .. } => "Request body too large".to_string(),
            GatewayError::ServiceNotFound(_) => "Service not found".to_string(),
            GatewayError::Upstream { .. } => "Upstream service unavailable".to_string(),
            GatewayError::UpstreamTimeout { .. } => "Upstream service timed out".to_string(),
            GatewayError::CircuitOpen { .. } => {
                "Service temporarily unavailable".to_string()
            }
            GatewayError::Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Render as a response carrying the request id in body and header.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
            request_id: request_id.to_string(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response.headers_mut().insert("x-request-id", value);
        }
        if let GatewayError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
