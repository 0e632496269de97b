use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::HealthCheckConfig,
    core::{GatewayService, ServiceEndpoint, ServiceStatus},
    metrics,
    ports::http_client::HttpClient,
};

/// Result of probing one service once.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub service: String,
    pub url: String,
    pub healthy: bool,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Background prober keeping the gateway's health registry current.
#[derive(Clone)]
pub struct HealthMonitor {
    gateway: Arc<GatewayService>,
    http_client: Arc<dyn HttpClient>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(gateway: Arc<GatewayService>, http_client: Arc<dyn HttpClient>) -> Self {
        let config = gateway.config().health_check.clone();
        Self {
            gateway,
            http_client,
            config,
        }
    }

    /// GET `<url><path>` once. Only a 200 counts as healthy. Does not touch the registry.
    pub async fn probe(&self, endpoint: &ServiceEndpoint) -> ProbeResult {
        let url = endpoint.url.join(&self.config.path, None);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();

        let outcome = self.http_client.probe(&url, timeout).await;
        let latency = started.elapsed();

        let (healthy, error) = match outcome {
            Ok(status) if status == http::StatusCode::OK => (true, None),
            Ok(status) => (false, Some(format!("unexpected status {status}"))),
            Err(e) => (false, Some(e.to_string())),
        };

        ProbeResult {
            service: endpoint.name.clone(),
            url,
            healthy,
            latency,
            error,
        }
    }

    /// Probe every service concurrently and fold the results into the registry.
    pub async fn run_cycle(&self) -> Vec<ProbeResult> {
        let results = join_all(self.gateway.endpoints().iter().map(|e| self.probe(e))).await;

        let registry = self.gateway.health();
        for result in &results {
            let previous = registry.status(&result.service);
            let current = if result.healthy {
                registry.record_success(&result.service, result.latency)
            } else {
                registry.record_failure(&result.service, self.config.unhealthy_threshold)
            };

            if let Some(status) = current {
                metrics::set_service_health_status(
                    &result.service,
                    status == ServiceStatus::Healthy,
                );
                if previous != current {
                    tracing::info!(
                        service = %result.service,
                        from = previous.map(|s| s.as_str()).unwrap_or("unknown"),
                        to = status.as_str(),
                        "Service health changed"
                    );
                }
            }
            if let Some(error) = &result.error {
                tracing::debug!(service = %result.service, error = %error, "Health probe failed");
            }
        }

        results
    }

    /// Spawn the periodic loop. It stops when `cancel_token` is cancelled.
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                tracing::info!("Health checking is disabled");
                return;
            }

            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = self.config.interval_secs,
                timeout_secs = self.config.timeout_secs,
                path = %self.config.path,
                "Health monitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        tracing::info!("Health monitor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let results = self.run_cycle().await;
                        tracing::debug!(
                            services_checked = results.len(),
                            aggregate = self.gateway.health().aggregate().as_str(),
                            "Health check cycle completed"
                        );
                    }
                }
            }
        })
    }
}
