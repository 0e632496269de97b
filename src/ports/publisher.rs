use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PublishError {
    /// Nobody is subscribed to the subject
    #[error("No subscribers for subject '{0}'")]
    NoSubscribers(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// MessagePublisher is the port to the pub/sub broker that chat traffic is bridged into.
#[async_trait]
pub trait MessagePublisher: Send + Sync + 'static {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError>;
}
