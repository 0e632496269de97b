pub mod circuit_breaker;
pub mod gateway;
pub mod header_policy;
pub mod health;
pub mod path_transformer;
pub mod rate_limiter;
pub mod retry;
pub mod service;
pub mod ws_protocol;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use gateway::GatewayService;
pub use health::{HealthRegistry, ServiceHealthRecord, ServiceStatus};
pub use path_transformer::PathTransformer;
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use retry::RetryPolicy;
pub use service::{ServiceEndpoint, ServiceUrl};
