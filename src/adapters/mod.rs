pub mod forwarder;
pub mod health_monitor;
pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod publisher;
pub mod websocket_hub;

/// Re-export commonly used types from adapters
pub use forwarder::{Forwarder, ProxyCallContext};
pub use health_monitor::{HealthMonitor, ProbeResult};
pub use http_client::HttpClientAdapter;
pub use http_handler::{AppState, create_router};
pub use middleware::RequestId;
pub use publisher::{BroadcastPublisher, PublishedMessage};
pub use websocket_hub::WebSocketHub;
