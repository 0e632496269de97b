//! Per-service circuit breaker.
//!
//! State moves only along `Closed -> Open -> HalfOpen -> {Closed | Open}`.
//! Every change goes through [`CircuitState::on_event`], the single transition
//! table; the breaker itself only owns the lock and the side effects (logs,
//! gauges). Breakers live in a [`CircuitBreakerRegistry`] keyed by service
//! name and are created on first use.
use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use scc::HashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::{config::CircuitBreakerConfig, metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Inputs to the transition table.
#[derive(Debug, Clone, Copy)]
enum CircuitEvent {
    Admit { now: Instant, cooldown: Duration },
    Success,
    Failure { now: Instant, tripped: bool },
    /// An admitted call ended without an outcome (caller went away).
    Abandon,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open { .. } => 1.0,
            CircuitState::HalfOpen { .. } => 2.0,
        }
    }

    /// Returns the next state and whether the call is admitted (only meaningful for `Admit`).
    fn on_event(self, event: CircuitEvent) -> (CircuitState, bool) {
        use CircuitEvent::*;
        use CircuitState::*;

        match (self, event) {
            (Closed, Admit { .. }) => (Closed, true),
            (Open { opened_at }, Admit { now, cooldown }) => {
                if now.saturating_duration_since(opened_at) >= cooldown {
                    (HalfOpen { trial_in_flight: true }, true)
                } else {
                    (self, false)
                }
            }
            (HalfOpen { trial_in_flight: false }, Admit { .. }) => {
                (HalfOpen { trial_in_flight: true }, true)
            }
            (HalfOpen { trial_in_flight: true }, Admit { .. }) => (self, false),

            (Closed, Success) => (Closed, true),
            (HalfOpen { .. }, Success) => (Closed, true),
            // A call admitted before the circuit opened; the cooldown still applies.
            (Open { .. }, Success) => (self, true),

            (Closed, Failure { now, tripped: true }) => (Open { opened_at: now }, true),
            (Closed, Failure { tripped: false, .. }) => (Closed, true),
            (HalfOpen { .. }, Failure { now, .. }) => (Open { opened_at: now }, true),
            (Open { .. }, Failure { .. }) => (self, true),

            (HalfOpen { .. }, Abandon) => (HalfOpen { trial_in_flight: false }, true),
            (Closed | Open { .. }, Abandon) => (self, true),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
}

/// Failure-isolation state machine for one service. Safe to share across tasks.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: RwLock<BreakerInner>,
}

/// Point-in-time view of one breaker, as served by `/gateway/circuits`.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
    /// Seconds since the circuit opened, when open.
    pub open_for_secs: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            service: service.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    pub fn from_config(service: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(service, config.failure_threshold, config.cooldown())
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state
    }

    pub fn can_execute(&self) -> bool {
        self.can_execute_at(Instant::now())
    }

    /// Admission check. In half-open state exactly one caller is let through
    /// until its outcome is reported.
    pub fn can_execute_at(&self, now: Instant) -> bool {
        {
            let inner = self
                .inner
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if inner.state == CircuitState::Closed {
                return true;
            }
        }

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (next, admitted) = inner.state.on_event(CircuitEvent::Admit {
            now,
            cooldown: self.cooldown,
        });
        self.apply(&mut inner, next);
        admitted
    }

    pub fn on_success(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (next, _) = inner.state.on_event(CircuitEvent::Success);
        if next == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        self.apply(&mut inner, next);
    }

    pub fn on_failure(&self) {
        self.on_failure_at(Instant::now())
    }

    pub fn on_failure_at(&self, now: Instant) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let tripped = inner.consecutive_failures >= self.failure_threshold;
        let (next, _) = inner.state.on_event(CircuitEvent::Failure { now, tripped });
        self.apply(&mut inner, next);
    }

    /// Release an admission that will never report an outcome, so a pending
    /// half-open trial slot is handed to the next caller.
    pub fn on_abandoned(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (next, _) = inner.state.on_event(CircuitEvent::Abandon);
        self.apply(&mut inner, next);
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let open_for_secs = match inner.state {
            CircuitState::Open { opened_at } => Some(opened_at.elapsed().as_secs()),
            _ => None,
        };
        CircuitSnapshot {
            service: self.service.clone(),
            state: inner.state.name(),
            consecutive_failures: inner.consecutive_failures,
            open_for_secs,
        }
    }

    fn apply(&self, inner: &mut BreakerInner, next: CircuitState) {
        let previous = inner.state;
        inner.state = next;

        if previous.name() != next.name() {
            match next {
                CircuitState::Open { .. } => tracing::warn!(
                    service = %self.service,
                    from = previous.name(),
                    failures = inner.consecutive_failures,
                    "Circuit opened"
                ),
                _ => tracing::info!(
                    service = %self.service,
                    from = previous.name(),
                    to = next.name(),
                    "Circuit state changed"
                ),
            }
            metrics::set_circuit_state(&self.service, next.gauge_value());
        }
    }
}

/// Lazily populated map of breakers, one per service name.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: HashMap::new(),
        }
    }

    /// Fetch the breaker for `service`, creating it closed on first use.
    pub async fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(entry) = self.breakers.get_async(service).await {
            return entry.get().clone();
        }

        self.breakers
            .entry_async(service.to_string())
            .await
            .or_insert_with(|| Arc::new(CircuitBreaker::from_config(service, &self.config)))
            .get()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshot of every breaker created so far, sorted by service name.
    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots = Vec::new();
        self.breakers
            .retain_async(|_, breaker| {
                snapshots.push(breaker.snapshot());
                true
            })
            .await;
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}
