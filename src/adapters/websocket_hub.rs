//! WebSocket connection hub.
//!
//! Every live socket is registered in the hub with an outbound queue, the set
//! of channels it joined and its last activity time. Each connection runs two
//! tasks: a reader that dispatches envelopes (see [`ws_protocol`]) and a writer
//! that drains the outbound queue with a per-write deadline. All sends from the
//! hub use `try_send`, so a stuck peer can never block it; a failed send or
//! write deregisters the connection, which in turn stops both tasks.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::{
    sync::{RwLock, broadcast, mpsc},
    task::JoinHandle,
    time::{Instant, timeout},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    adapters::publisher::PublishedMessage,
    config::WebSocketConfig,
    core::ws_protocol::{self, Dispatch, ServerEnvelope},
    metrics,
    ports::publisher::MessagePublisher,
};

pub type ConnectionId = Uuid;

struct ConnectionEntry {
    sender: mpsc::Sender<Message>,
    channels: HashSet<String>,
    last_activity: Instant,
    /// Cancelled on deregistration; stops the connection's read loop.
    closed: CancellationToken,
}

/// Read-only view of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub channels: Vec<String>,
    pub idle_secs: u64,
}

pub struct WebSocketHub {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    publisher: Arc<dyn MessagePublisher>,
    config: WebSocketConfig,
}

impl WebSocketHub {
    pub fn new(config: WebSocketConfig, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            publisher,
            config,
        }
    }

    /// Add a connection. Returns its id, the receiving end of its outbound
    /// queue and the token cancelled when it is deregistered.
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<Message>, CancellationToken) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.config.outbound_buffer.max(1));
        let closed = CancellationToken::new();

        let count = {
            let mut connections = self.connections.write().await;
            connections.insert(
                id,
                ConnectionEntry {
                    sender,
                    channels: HashSet::new(),
                    last_activity: Instant::now(),
                    closed: closed.clone(),
                },
            );
            connections.len()
        };

        metrics::set_websocket_connections(count);
        tracing::debug!(connection_id = %id, connections = count, "WebSocket connection registered");
        (id, receiver, closed)
    }

    /// Remove a connection. Returns false if it was already gone.
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&id);
            (removed, connections.len())
        };

        match removed {
            Some(entry) => {
                entry.closed.cancel();
                metrics::set_websocket_connections(count);
                tracing::debug!(connection_id = %id, connections = count, "WebSocket connection deregistered");
                true
            }
            None => false,
        }
    }

    pub async fn join(&self, id: ConnectionId, channel: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&id) {
            Some(entry) => {
                entry.channels.insert(channel.to_string());
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    pub async fn touch(&self, id: ConnectionId) {
        if let Some(entry) = self.connections.write().await.get_mut(&id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Queue a message for one connection without waiting. A full or closed
    /// queue deregisters the connection.
    pub async fn send_to(&self, id: ConnectionId, message: Message) -> bool {
        let delivered = {
            let connections = self.connections.read().await;
            match connections.get(&id) {
                Some(entry) => entry.sender.try_send(message).is_ok(),
                None => return false,
            }
        };

        if !delivered {
            tracing::warn!(connection_id = %id, "WebSocket send failed, dropping connection");
            self.deregister(id).await;
        }
        delivered
    }

    pub async fn send_envelope(&self, id: ConnectionId, envelope: &ServerEnvelope) -> bool {
        metrics::increment_ws_message("egress", envelope.kind());
        self.send_to(id, Message::Text(envelope.to_json().into()))
            .await
    }

    /// Send `text` to every member of `channel`, or to everyone when `channel`
    /// is `None`. Returns the number of connections that accepted it.
    pub async fn broadcast(&self, channel: Option<&str>, text: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, entry) in connections.iter() {
                if channel.is_some_and(|c| !entry.channels.contains(c)) {
                    continue;
                }
                if entry
                    .sender
                    .try_send(Message::Text(text.to_string().into()))
                    .is_ok()
                {
                    delivered += 1;
                } else {
                    failed.push(*id);
                }
            }
        }

        for id in failed {
            tracing::warn!(connection_id = %id, "WebSocket broadcast failed, dropping connection");
            self.deregister(id).await;
        }
        delivered
    }

    /// Send a close frame to every connection and deregister all of them.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(ConnectionId, ConnectionEntry)> =
            self.connections.write().await.drain().collect();

        for (_, entry) in &drained {
            let _ = entry.sender.try_send(Message::Close(None));
            entry.closed.cancel();
        }
        metrics::set_websocket_connections(0);

        if !drained.is_empty() {
            tracing::info!(connections = drained.len(), "Closed all WebSocket connections");
        }
        drained.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn summaries(&self) -> Vec<ConnectionSummary> {
        let now = Instant::now();
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, entry)| {
                let mut channels: Vec<String> = entry.channels.iter().cloned().collect();
                channels.sort();
                ConnectionSummary {
                    id: *id,
                    channels,
                    idle_secs: now.saturating_duration_since(entry.last_activity).as_secs(),
                }
            })
            .collect()
    }

    /// Apply the effects of one inbound text frame.
    pub async fn handle_text(&self, id: ConnectionId, raw: &str) {
        let dispatch = ws_protocol::dispatch(raw, chrono::Utc::now().timestamp());
        metrics::increment_ws_message("ingress", dispatch.kind());

        match dispatch {
            Dispatch::Reply(envelope) => {
                self.send_envelope(id, &envelope).await;
            }
            Dispatch::JoinChannel { channel, reply } => {
                self.join(id, &channel).await;
                self.send_envelope(id, &reply).await;
            }
            Dispatch::Publish { payload } => {
                // Fire and forget: a broker failure is never reported to the client.
                if let Err(e) = self
                    .publisher
                    .publish(&self.config.chat_subject, payload)
                    .await
                {
                    tracing::warn!(
                        connection_id = %id,
                        subject = %self.config.chat_subject,
                        error = %e,
                        "Failed to publish chat message"
                    );
                }
            }
        }
    }

    /// Drive one upgraded socket until the peer goes away or the hub drops it.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (id, mut outbound, closed) = self.register().await;
        let (mut sink, mut stream) = socket.split();

        let write_timeout = Duration::from_secs(self.config.write_timeout_secs.max(1));
        let hub = self.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let closing = matches!(message, Message::Close(_));
                match timeout(write_timeout, sink.send(message)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "WebSocket write failed");
                        hub.deregister(id).await;
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(connection_id = %id, "WebSocket write timed out");
                        hub.deregister(id).await;
                        break;
                    }
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let welcome = ServerEnvelope::welcome(chrono::Utc::now().timestamp());
        self.send_envelope(id, &welcome).await;

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.touch(id).await;
                        self.handle_text(id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "WebSocket read failed");
                        break;
                    }
                    // Binary frames are not part of the protocol; ping/pong is handled by axum.
                    Some(Ok(_)) => self.touch(id).await,
                }
            }
        }

        self.deregister(id).await;
        let _ = writer.await;
    }

    /// Deliver chat messages published on the chat subject to the members of
    /// the envelope's channel (everyone when it names none).
    pub fn start_chat_fanout(
        self: Arc<Self>,
        mut messages: broadcast::Receiver<PublishedMessage>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    message = messages.recv() => match message {
                        Ok(message) if message.subject == self.config.chat_subject => {
                            let channel = ws_protocol::chat_channel(&message.payload);
                            let text = String::from_utf8_lossy(&message.payload);
                            let delivered = self.broadcast(channel.as_deref(), &text).await;
                            tracing::debug!(channel = ?channel, delivered, "Chat message fanned out");
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Chat fan-out lagging behind the broker");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            tracing::info!("Chat fan-out stopped");
        })
    }
}
