//! game-gateway - the single network entry point for a fleet of game backend services.
//!
//! The gateway accepts all external HTTP and WebSocket traffic for the game backends
//! (auth, player, world, combat, inventory, guild, chat, analytics), routes each request
//! to the service that owns it and forwards it with retries. Around that it keeps one
//! unhealthy backend from degrading the others.
//!
//! # Features
//! - Longest-prefix service routing with exact and prefix path rewrites
//! - Buffered forwarding with bounded bodies, per-call deadlines and linear backoff retries
//! - Per-service circuit breakers (closed, open, half-open) created on first use
//! - Per-client token-bucket rate limiting with an optional load-driven penalty
//! - Concurrent background health probing with hysteresis and a fresh aggregate on read
//! - A WebSocket hub bridging chat envelopes into a publish/subscribe broker
//! - Structured tracing via `tracing` and counters/gauges via the `metrics` facade
//! - Graceful shutdown with a bounded drain and supervised background tasks
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use game_gateway::{
//!     adapters::{AppState, BroadcastPublisher, HttpClientAdapter, create_router},
//!     config::ServerConfig,
//!     core::GatewayService,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg: ServerConfig = game_gateway::config::loader::load_config("config.toml").await?;
//! let gateway = Arc::new(GatewayService::new(Arc::new(cfg))?);
//! let state = AppState::new(
//!     gateway,
//!     Arc::new(HttpClientAdapter::new()?),
//!     Arc::new(BroadcastPublisher::default()),
//! );
//! let app = create_router(state);
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits at the I/O seams: upstream HTTP, pub/sub) from
//! **adapters** (hyper client, in-process broker, Axum frontend, forwarder, health
//! monitor, WebSocket hub) while the routing, retry, breaker, rate-limit, health and
//! envelope logic lives in `core` without any I/O.
//!
//! # Error Handling
//! Startup and plumbing return `eyre::Result<T>` with `WrapErr` context. Request
//! handling produces [`error::GatewayError`], rendered as `{error, request_id}` without
//! upstream details.
//!
//! # Concurrency & Data Structures
//! Breakers and rate-limit buckets live in `scc::HashMap`s; the health registry and the
//! WebSocket connection registry sit behind reader/writer locks. No lock is held across
//! a network call.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{AppState, Forwarder, HealthMonitor, HttpClientAdapter, WebSocketHub, create_router},
    core::GatewayService,
    error::GatewayError,
    ports::{http_client::HttpClient, publisher::MessagePublisher},
    utils::{BackgroundTasks, GracefulShutdown},
};
