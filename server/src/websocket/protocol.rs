//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and tagged by a snake_case `type` field.
//! Payloads are opaque to the server; it only routes them by topic.

use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving publishes on these topics.
    Subscribe {
        #[serde(default)]
        topics: Vec<String>,
    },

    /// Stop receiving publishes on these topics.
    Unsubscribe {
        #[serde(default)]
        topics: Vec<String>,
    },

    /// Relay `data` to every other subscriber of `topic`.
    Publish {
        topic: String,
        data: serde_json::Value,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A publish relayed from another subscriber.
    Publish {
        topic: String,
        data: serde_json::Value,
        /// Subscribers of the topic, the publisher included.
        clients: usize,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_deserialization() {
        let json = r#"{"type": "subscribe", "topics": ["room-a", "room-b"]}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe { topics } => assert_eq!(topics, vec!["room-a", "room-b"]),
            _ => panic!("Expected Subscribe message"),
        }

        let json = r#"{"type": "publish", "topic": "room-a", "data": {"from": 1}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Publish { topic, data } => {
                assert_eq!(topic, "room-a");
                assert_eq!(data, json!({"from": 1}));
            }
            _ => panic!("Expected Publish message"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "unsubscribe"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { topics } if topics.is_empty()));

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_server_message_serialization() {
        let json = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let msg = ServerMessage::Publish {
            topic: "room-a".to_string(),
            data: json!({"x": 1}),
            clients: 2,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "publish", "topic": "room-a", "data": {"x": 1}, "clients": 2})
        );

        let json = serde_json::to_string(&ServerMessage::error("test error")).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""message":"test error""#));
    }
}
