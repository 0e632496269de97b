//! In-process pub/sub broker adapter backed by a tokio broadcast channel.
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::ports::publisher::{MessagePublisher, PublishError};

/// A message delivered to subscribers.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessagePublisher for BroadcastPublisher {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        self.tx
            .send(PublishedMessage {
                subject: subject.to_string(),
                payload,
            })
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers(subject.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher
            .publish("chat.messages", Bytes::from_static(b"{\"type\":\"chat_message\"}"))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.subject, "chat.messages");
        assert_eq!(&msg.payload[..], b"{\"type\":\"chat_message\"}");
    }

    #[tokio::test]
    async fn publish_without_subscribers_fails() {
        let publisher = BroadcastPublisher::new(8);
        let err = publisher
            .publish("chat.messages", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::NoSubscribers(_)));
    }
}
