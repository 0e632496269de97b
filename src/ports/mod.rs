pub mod http_client;
pub mod publisher;

pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use publisher::{MessagePublisher, PublishError};
