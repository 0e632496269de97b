//! Per-client token-bucket admission control.
//!
//! Each client key owns a bucket of `burst` tokens that refills continuously at
//! `requests_per_minute / 60` tokens per second. Refill is computed on demand
//! at every check, never ticked. Buckets are created on first use and dropped
//! by [`RateLimiter::cleanup`] once they are full again (idle client).
//!
//! With adaptive mode enabled the cost of a request grows with the reported
//! gateway load, see [`load_penalty`].
use std::{
    net::{IpAddr, SocketAddr},
    sync::atomic::{AtomicU64, Ordering},
};

use http::HeaderMap;
use scc::HashMap;
use tokio::time::Instant;

use crate::{config::RateLimitConfig, core::header_policy};

/// Outcome of one admission check, carried into the response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Whole tokens left after this check.
    pub remaining: u32,
    /// Seconds until the rejected request would be admitted (0 when allowed).
    pub retry_after_secs: u64,
    /// Seconds until the bucket is full again.
    pub reset_after_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    /// A new bucket starts full.
    pub fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            capacity,
            refill_rate,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn is_full(&self) -> bool {
        self.tokens >= self.capacity
    }

    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Refill, then take `cost` tokens if available.
    pub fn try_consume(&mut self, cost: f64, limit: u32, now: Instant) -> RateLimitDecision {
        self.refill(now);

        let allowed = self.tokens >= cost;
        if allowed {
            self.tokens -= cost;
        }

        let retry_after_secs = if allowed {
            0
        } else {
            self.seconds_until(cost)
        };

        RateLimitDecision {
            allowed,
            limit,
            remaining: self.tokens.max(0.0).floor() as u32,
            retry_after_secs,
            reset_after_secs: self.seconds_until(self.capacity),
        }
    }

    fn seconds_until(&self, level: f64) -> u64 {
        let missing = (level - self.tokens).max(0.0);
        if missing == 0.0 {
            return 0;
        }
        if self.refill_rate <= 0.0 {
            return u64::MAX;
        }
        (missing / self.refill_rate).ceil() as u64
    }
}

/// Token cost multiplier for the reported load:
/// `1 + max(0, (load - 0.8 * max_load) / (0.2 * max_load))`.
pub fn load_penalty(load: f64, max_load: f64) -> f64 {
    if max_load <= 0.0 {
        return 1.0;
    }
    1.0 + ((load - 0.8 * max_load) / (0.2 * max_load)).max(0.0)
}

/// Resolve the bucket key for a request: user id, then character id, then client IP.
pub fn resolve_client_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(user) = header("x-user-id") {
        return format!("user:{user}");
    }
    if let Some(character) = header("x-character-id") {
        return format!("character:{character}");
    }
    format!("ip:{}", header_policy::client_ip(headers, peer, trusted_proxies))
}

pub struct RateLimiter {
    config: RateLimitConfig,
    capacity: f64,
    refill_rate: f64,
    buckets: HashMap<String, TokenBucket>,
    /// Last reported load, stored as `f64` bits.
    load: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst);
        let refill_rate = f64::from(config.requests_per_minute) / 60.0;
        Self {
            config,
            capacity,
            refill_rate,
            buckets: HashMap::new(),
            load: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Feed the current load figure used by adaptive mode.
    pub fn report_load(&self, load: f64) {
        self.load.store(load.to_bits(), Ordering::Relaxed);
    }

    pub fn current_load(&self) -> f64 {
        f64::from_bits(self.load.load(Ordering::Relaxed))
    }

    /// Effective cost of a request of `n` tokens under the current load.
    pub fn cost(&self, n: f64) -> f64 {
        match &self.config.adaptive {
            Some(adaptive) => n * load_penalty(self.current_load(), adaptive.max_load),
            None => n,
        }
    }

    pub async fn allow(&self, key: &str) -> RateLimitDecision {
        self.allow_n_at(key, 1.0, Instant::now()).await
    }

    pub async fn allow_n_at(&self, key: &str, n: f64, now: Instant) -> RateLimitDecision {
        // A cost above capacity could never be paid, whatever Retry-After says.
        let cost = self.cost(n).min(self.capacity);
        let (capacity, refill_rate) = (self.capacity, self.refill_rate);

        let mut entry = self
            .buckets
            .entry_async(key.to_string())
            .await
            .or_insert_with(|| TokenBucket::new(capacity, refill_rate, now));
        let decision = entry
            .get_mut()
            .try_consume(cost, self.config.requests_per_minute, now);
        drop(entry);

        if !decision.allowed {
            tracing::debug!(
                client = %key,
                retry_after = decision.retry_after_secs,
                cost,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Tokens currently held by `key` without refilling, if it has a bucket.
    pub async fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets
            .get_async(key)
            .await
            .map(|entry| entry.get().tokens())
    }

    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now()).await
    }

    /// Drop buckets that have refilled to capacity. Returns how many were removed.
    pub async fn cleanup_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.buckets
            .retain_async(|_, bucket| {
                bucket.refill(now);
                let keep = !bucket.is_full();
                if !keep {
                    removed += 1;
                }
                keep
            })
            .await;

        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "Rate limit buckets cleaned up");
        }
        removed
    }
}
