//! WebSocket envelope protocol.
//!
//! Clients send JSON objects with a string `type` field. [`dispatch`] maps one
//! inbound text frame to the reply and/or side effect the hub has to perform,
//! without touching the transport.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WELCOME_MESSAGE: &str = "Connected to game gateway";

pub const ERR_UNKNOWN_TYPE: &str = "Unknown message type";
pub const ERR_TYPE_REQUIRED: &str = "Message type required";
pub const ERR_CHANNEL_REQUIRED: &str = "Channel required";
pub const ERR_INVALID_FORMAT: &str = "Invalid message format";

/// Envelopes sent from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    Welcome { message: String, time: i64 },
    Pong { time: i64 },
    ChannelJoined { channel: String, time: i64 },
    Error { error: String },
}

impl ServerEnvelope {
    pub fn welcome(time: i64) -> Self {
        ServerEnvelope::Welcome {
            message: WELCOME_MESSAGE.to_string(),
            time,
        }
    }

    pub fn error(error: &str) -> Self {
        ServerEnvelope::Error {
            error: error.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEnvelope::Welcome { .. } => "welcome",
            ServerEnvelope::Pong { .. } => "pong",
            ServerEnvelope::ChannelJoined { .. } => "channel_joined",
            ServerEnvelope::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing a plain enum of strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// What the connection loop must do with one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Reply(ServerEnvelope),
    /// Record membership, then send `reply`.
    JoinChannel { channel: String, reply: ServerEnvelope },
    /// Forward the raw envelope to the pub/sub broker. No reply.
    Publish { payload: Bytes },
}

impl Dispatch {
    /// Envelope type label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Dispatch::Reply(ServerEnvelope::Pong { .. }) => "ping",
            Dispatch::Reply(_) => "invalid",
            Dispatch::JoinChannel { .. } => "join_channel",
            Dispatch::Publish { .. } => "chat_message",
        }
    }
}

/// Decide the response to one text frame. `now` is Unix seconds.
pub fn dispatch(raw: &str, now: i64) -> Dispatch {
    let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(raw) else {
        return Dispatch::Reply(ServerEnvelope::error(ERR_INVALID_FORMAT));
    };

    let Some(kind) = envelope.get("type").and_then(Value::as_str).filter(|t| !t.is_empty())
    else {
        return Dispatch::Reply(ServerEnvelope::error(ERR_TYPE_REQUIRED));
    };

    match kind {
        "ping" => Dispatch::Reply(ServerEnvelope::Pong { time: now }),
        "join_channel" => match envelope
            .get("channel")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
        {
            Some(channel) => Dispatch::JoinChannel {
                channel: channel.to_string(),
                reply: ServerEnvelope::ChannelJoined {
                    channel: channel.to_string(),
                    time: now,
                },
            },
            None => Dispatch::Reply(ServerEnvelope::error(ERR_CHANNEL_REQUIRED)),
        },
        "chat_message" => Dispatch::Publish {
            payload: Bytes::copy_from_slice(raw.as_bytes()),
        },
        _ => Dispatch::Reply(ServerEnvelope::error(ERR_UNKNOWN_TYPE)),
    }
}

/// Target channel of a published chat envelope, if it names one.
pub fn chat_channel(payload: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    value
        .get("channel")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reply_json(d: Dispatch) -> Value {
        match d {
            Dispatch::Reply(env) | Dispatch::JoinChannel { reply: env, .. } => {
                serde_json::to_value(env).unwrap()
            }
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn ping_yields_pong_with_time() {
        let reply = reply_json(dispatch(r#"{"type":"ping"}"#, 1_700_000_000));
        assert_eq!(reply, json!({"type": "pong", "time": 1_700_000_000}));
    }

    #[test]
    fn unknown_and_missing_type() {
        assert_eq!(
            reply_json(dispatch(r#"{"type":"bogus"}"#, 0)),
            json!({"type": "error", "error": "Unknown message type"})
        );
        assert_eq!(
            reply_json(dispatch("{}", 0)),
            json!({"type": "error", "error": "Message type required"})
        );
        assert_eq!(
            reply_json(dispatch(r#"{"type":42}"#, 0)),
            json!({"type": "error", "error": "Message type required"})
        );
    }

    #[test]
    fn malformed_frames() {
        for raw in ["not json", "[1,2]", "\"ping\""] {
            assert_eq!(
                reply_json(dispatch(raw, 0)),
                json!({"type": "error", "error": "Invalid message format"})
            );
        }
    }

    #[test]
    fn join_channel() {
        match dispatch(r#"{"type":"join_channel","channel":"guild-7"}"#, 5) {
            Dispatch::JoinChannel { channel, reply } => {
                assert_eq!(channel, "guild-7");
                assert_eq!(
                    serde_json::to_value(reply).unwrap(),
                    json!({"type": "channel_joined", "channel": "guild-7", "time": 5})
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            reply_json(dispatch(r#"{"type":"join_channel"}"#, 5)),
            json!({"type": "error", "error": "Channel required"})
        );
    }

    #[test]
    fn chat_message_publishes_raw_envelope() {
        let raw = r#"{"type":"chat_message","channel":"world","text":"gg"}"#;
        match dispatch(raw, 0) {
            Dispatch::Publish { payload } => {
                assert_eq!(&payload[..], raw.as_bytes());
                assert_eq!(chat_channel(&payload).as_deref(), Some("world"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(chat_channel(br#"{"type":"chat_message"}"#), None);
    }

    #[test]
    fn welcome_envelope_shape() {
        let json: Value = serde_json::from_str(&ServerEnvelope::welcome(9).to_json()).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["time"], 9);
        assert!(json["message"].is_string());
    }
}
