//! Configuration data structures for the gateway.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! intentionally serde‑friendly and include defaults so that minimal configs remain concise:
//! a file only has to name its services.
use std::{collections::HashMap, net::IpAddr, time::Duration};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_gateway_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_service_timeout() -> String {
    "30s".to_string()
}

fn default_service_retries() -> u32 {
    3
}

/// Top level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Value sent upstream in `X-Gateway-Version`.
    #[serde(default = "default_gateway_version")]
    pub gateway_version: String,
    /// External prefix under which backend services are exposed.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Upper bound for a buffered request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` are believed. Empty means
    /// the socket peer is always the client.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    pub path_rewrites: PathRewriteConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Route prefix of a service, falling back to `<api_prefix>/<name>`.
    pub fn route_prefix_for(&self, name: &str, service: &ServiceConfig) -> String {
        service
            .route_prefix
            .clone()
            .unwrap_or_else(|| format!("{}/{name}", self.api_prefix.trim_end_matches('/')))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            gateway_version: default_gateway_version(),
            api_prefix: default_api_prefix(),
            max_body_bytes: default_max_body_bytes(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            trusted_proxies: Vec::new(),
            services: HashMap::new(),
            path_rewrites: PathRewriteConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            health_check: HealthCheckConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Trust forwarding headers set by this peer
    pub fn trusted_proxy(mut self, addr: IpAddr) -> Self {
        self.config.trusted_proxies.push(addr);
        self
    }

    /// Register a backend service
    pub fn service(mut self, name: impl Into<String>, service: ServiceConfig) -> Self {
        self.config.services.insert(name.into(), service);
        self
    }

    /// Add an exact path rewrite
    pub fn exact_rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.config.path_rewrites.exact.insert(from.into(), to.into());
        self
    }

    /// Add a prefix path rewrite
    pub fn prefix_rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.config
            .path_rewrites
            .prefix
            .insert(from.into(), to.into());
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Set health check configuration
    pub fn health_check(mut self, config: HealthCheckConfig) -> Self {
        self.config.health_check = config;
        self
    }

    pub fn websocket(mut self, config: WebSocketConfig) -> Self {
        self.config.websocket = config;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.config.max_body_bytes = limit;
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> Result<ServerConfig, String> {
        if self.config.services.is_empty() {
            return Err("At least one service must be configured".to_string());
        }
        Ok(self.config)
    }
}

/// One backend service entry of the registry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Base URL, e.g. `http://player-service:8082`
    pub url: String,
    /// Per-call timeout, parsed by humantime ("10s", "1500ms").
    #[serde(default = "default_service_timeout")]
    pub timeout: String,
    /// Extra attempts after the first one.
    #[serde(default = "default_service_retries")]
    pub retries: u32,
    /// External prefix routed to this service (defaults to `<api_prefix>/<name>`).
    #[serde(default)]
    pub route_prefix: Option<String>,
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: default_service_timeout(),
            retries: default_service_retries(),
            route_prefix: None,
        }
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }
}

/// Path transformation tables.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PathRewriteConfig {
    /// Literal path → literal replacement.
    #[serde(default)]
    pub exact: HashMap<String, String>,
    /// Prefix → replacement prefix (longest prefix wins).
    #[serde(default)]
    pub prefix: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_delay_ms: 500 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

/// Per-client token bucket settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    /// Bucket capacity.
    pub burst: u32,
    pub cleanup_interval_secs: u64,
    pub adaptive: Option<AdaptiveRateLimitConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 100,
            burst: 20,
            cleanup_interval_secs: 60,
            adaptive: None,
        }
    }
}

/// Enables load-driven token cost. Load is the number of in-flight forwarded requests.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdaptiveRateLimitConfig {
    pub max_load: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub path: String,
    /// A service turns unhealthy once its consecutive errors exceed this value.
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    /// Pub/sub subject for bridged `chat_message` envelopes.
    pub chat_subject: String,
    /// Depth of each connection's outbound queue.
    pub outbound_buffer: usize,
    pub write_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_subject: "chat.messages".to_string(),
            outbound_buffer: 64,
            write_timeout_secs: 10,
        }
    }
}
