//! Supervised long-lived tasks.
//!
//! Every periodic job (health probing, rate-limit cleanup, chat fan-out) is
//! spawned through [`BackgroundTasks`], which owns the shared cancellation
//! token and the join handles. Shutdown cancels the token and waits for the
//! tasks up to a deadline, aborting whatever is still running after it.
use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::RateLimiter;

pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Token cancelled by [`shutdown`](Self::shutdown). Tasks must stop when it fires.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a task that was spawned with a child of [`token`](Self::token).
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        tracing::debug!(task = name, "Background task started");
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait for them, at most `timeout` in total.
    /// Returns the number of tasks that had to be aborted.
    pub async fn shutdown(self, timeout: Duration) -> usize {
        self.token.cancel();

        let names: Vec<&'static str> = self.handles.iter().map(|(name, _)| *name).collect();
        let aborts: Vec<_> = self.handles.iter().map(|(_, h)| h.abort_handle()).collect();
        let joined = join_all(self.handles.into_iter().map(|(_, handle)| handle));

        match tokio::time::timeout(timeout, joined).await {
            Ok(results) => {
                for (name, result) in names.iter().zip(results) {
                    if let Err(e) = result {
                        tracing::warn!(task = name, error = %e, "Background task ended abnormally");
                    }
                }
                tracing::info!(tasks = names.len(), "Background tasks stopped");
                0
            }
            Err(_) => {
                let mut aborted = 0;
                for (name, abort) in names.iter().zip(aborts) {
                    if !abort.is_finished() {
                        tracing::warn!(task = name, "Background task did not stop in time, aborting");
                        abort.abort();
                        aborted += 1;
                    }
                }
                aborted
            }
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically drop idle rate-limit buckets until `cancel_token` fires.
pub fn start_rate_limit_cleanup(
    limiter: Arc<RateLimiter>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(limiter.config().cleanup_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing to clean yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    tracing::info!("Rate limit cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    limiter.cleanup().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_drops_idle_buckets() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst: 5,
            cleanup_interval_secs: 10,
            ..RateLimitConfig::default()
        }));
        limiter.allow("ip:10.0.0.1").await;
        assert_eq!(limiter.bucket_count(), 1);

        let mut tasks = BackgroundTasks::new();
        let handle = start_rate_limit_cleanup(limiter.clone(), tasks.token());
        tasks.track("rate_limit_cleanup", handle);

        // One token refills in a second; the next cleanup tick finds the bucket full.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(limiter.bucket_count(), 0);

        assert_eq!(tasks.shutdown(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_stuck_tasks() {
        let mut tasks = BackgroundTasks::new();
        tasks.track(
            "stuck",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        );
        let token = tasks.token();
        let cooperative = tokio::spawn(async move { token.cancelled().await });
        tasks.track("cooperative", cooperative);
        assert_eq!(tasks.len(), 2);

        assert_eq!(tasks.shutdown(Duration::from_secs(1)).await, 1);
    }
}
