use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

use crate::config::{ServerConfig, ServiceConfig};

/// Errors related to service registry entries
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    /// Error when URL is invalid
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid timeout for service '{service}': {reason}")]
    InvalidTimeout { service: String, reason: String },
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// A type-safe representation of a service base URL (no trailing slash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceUrl {
    url: String,
    /// `host[:port]`, reported to clients in `X-Gateway-Service`
    authority: String,
}

impl ServiceUrl {
    /// Creates a new ServiceUrl if the provided string is an http(s) URL with a host
    pub fn new(url: &str) -> ServiceResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ServiceError::InvalidUrl(format!("{url}: {e}")))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ServiceError::InvalidUrl(format!(
                "Service URL must start with http:// or https://, got: {url}"
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ServiceError::InvalidUrl(format!("Service URL has no host: {url}")))?;
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(ServiceUrl {
            url: url.trim_end_matches('/').to_string(),
            authority,
        })
    }

    /// Get the underlying URL as a string reference
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Join an absolute path (and optional raw query) onto the base URL.
    pub fn join(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{path}?{q}", self.url),
            _ => format!("{}{path}", self.url),
        }
    }
}

impl FromStr for ServiceUrl {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceUrl::new(s)
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A registered backend. Immutable for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub name: String,
    pub url: ServiceUrl,
    pub timeout: Duration,
    pub max_retries: u32,
    /// External path prefix routed to this service
    pub route_prefix: String,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, url: ServiceUrl, timeout: Duration, max_retries: u32) -> Self {
        let name = name.into();
        Self {
            route_prefix: format!("/api/v1/{name}"),
            name,
            url,
            timeout,
            max_retries,
        }
    }

    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    /// Build an endpoint from its registry entry.
    pub fn from_config(
        server: &ServerConfig,
        name: &str,
        service: &ServiceConfig,
    ) -> ServiceResult<Self> {
        let url = ServiceUrl::new(&service.url)?;
        let timeout = humantime::parse_duration(&service.timeout).map_err(|e| {
            ServiceError::InvalidTimeout {
                service: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self::new(name, url, timeout, service.retries)
            .with_route_prefix(server.route_prefix_for(name, service)))
    }

    /// True when `path` falls under this service's prefix on a segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        path.strip_prefix(self.route_prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}
