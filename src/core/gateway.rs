//! Core gateway orchestration service.
//!
//! `GatewayService` combines the immutable service registry built from
//! `ServerConfig` with the shared runtime state every request touches:
//! * Longest-prefix service resolution and path transformation
//! * Health registry (written by the health monitor, read everywhere else)
//! * Circuit breaker registry
//! * Per-client rate limiter
//! * In-flight request accounting (the load figure for adaptive limiting)
//!
//! This layer performs no I/O so it stays easy to test in isolation.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use crate::{
    config::ServerConfig,
    core::{
        circuit_breaker::CircuitBreakerRegistry,
        health::HealthRegistry,
        path_transformer::PathTransformer,
        rate_limiter::RateLimiter,
        retry::RetryPolicy,
        service::{ServiceEndpoint, ServiceResult},
    },
};

/// Central state shared by the HTTP frontend, forwarder and background tasks.
/// Wrap in an `Arc` and clone the handle.
pub struct GatewayService {
    config: Arc<ServerConfig>,
    /// Sorted by descending route prefix length.
    endpoints: Vec<ServiceEndpoint>,
    transformer: PathTransformer,
    health: Arc<HealthRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    rate_limiter: Arc<RateLimiter>,
    in_flight: AtomicU64,
    reloads: AtomicU64,
    started_at: Instant,
    started_at_wall: SystemTime,
}

impl GatewayService {
    /// Build the registry. Fails if any service entry is unusable.
    pub fn new(config: Arc<ServerConfig>) -> ServiceResult<Self> {
        let mut endpoints = config
            .services
            .iter()
            .map(|(name, service)| ServiceEndpoint::from_config(&config, name, service))
            .collect::<ServiceResult<Vec<_>>>()?;
        endpoints.sort_by(|a, b| {
            b.route_prefix
                .len()
                .cmp(&a.route_prefix.len())
                .then_with(|| a.name.cmp(&b.name))
        });

        let health = Arc::new(HealthRegistry::new(
            endpoints.iter().map(|e| e.name.as_str()),
        ));

        tracing::info!(
            services = endpoints.len(),
            "Gateway service registry initialized"
        );

        Ok(Self {
            transformer: PathTransformer::from_config(&config),
            breakers: Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            health,
            endpoints,
            config,
            in_flight: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            started_at: Instant::now(),
            started_at_wall: SystemTime::now(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &[ServiceEndpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Longest route prefix match for an incoming path.
    pub fn find_service(&self, path: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.iter().find(|e| e.matches(path))
    }

    pub fn transform_path(&self, path: &str) -> String {
        self.transformer.transform(path)
    }

    pub fn retry_policy(&self, endpoint: &ServiceEndpoint) -> RetryPolicy {
        RetryPolicy::new(endpoint.max_retries, self.config.retry.base_delay())
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Count a forwarded request as in flight until the guard drops.
    pub fn begin_request(&self) -> InFlightGuard<'_> {
        let load = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.rate_limiter.report_load(load as f64);
        InFlightGuard { gateway: self }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Record a reload request; returns the new count.
    pub fn bump_reload(&self) -> u64 {
        self.reloads.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at_wall
    }
}

pub struct InFlightGuard<'a> {
    gateway: &'a GatewayService,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let load = self.gateway.in_flight.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        self.gateway.rate_limiter.report_load(load as f64);
    }
}
