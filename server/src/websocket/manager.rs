//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and the topics each one subscribed
//! to, and relays publishes between subscribers of the same topic.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    /// Topics this connection is subscribed to
    pub topics: HashSet<String>,
}

/// Manages active WebSocket connections and topic subscriptions.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Subscribers of each topic, by connection ID.
    topics: DashMap<String, HashSet<String>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                sender,
                topics: HashSet::new(),
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection, dropping all of its subscriptions.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            for topic in &conn.topics {
                self.remove_subscriber(topic, conn_id);
            }

            tracing::info!(
                conn_id = %conn_id,
                topics = conn.topics.len(),
                "WebSocket connection unregistered"
            );
        }
    }

    /// Subscribe a connection to topics. Unknown connections are ignored.
    pub fn subscribe(&self, conn_id: &str, topics: &[String]) {
        let Some(mut conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        let added: Vec<String> = topics
            .iter()
            .filter(|topic| conn.topics.insert((*topic).clone()))
            .cloned()
            .collect();
        drop(conn);

        for topic in added {
            tracing::debug!(conn_id = %conn_id, topic = %topic, "Subscribed");
            self.topics
                .entry(topic)
                .or_default()
                .insert(conn_id.to_string());
        }
    }

    /// Unsubscribe a connection from topics.
    pub fn unsubscribe(&self, conn_id: &str, topics: &[String]) {
        let Some(mut conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        let removed: Vec<&String> = topics
            .iter()
            .filter(|topic| conn.topics.remove(*topic))
            .collect();
        drop(conn);

        for topic in removed {
            tracing::debug!(conn_id = %conn_id, topic = %topic, "Unsubscribed");
            self.remove_subscriber(topic, conn_id);
        }
    }

    /// Relay `data` to every subscriber of `topic` except the publisher.
    ///
    /// Returns the number of connections that received the message.
    pub fn publish(&self, sender_conn_id: &str, topic: &str, data: serde_json::Value) -> usize {
        let subscribers: Vec<String> = match self.topics.get(topic) {
            Some(subscribers) => subscribers.iter().cloned().collect(),
            None => return 0,
        };
        let message = ServerMessage::Publish {
            topic: topic.to_string(),
            data,
            clients: subscribers.len(),
        };

        let mut sent_count = 0;
        for conn_id in subscribers.iter().filter(|id| *id != sender_conn_id) {
            if let Some(conn) = self.connections.get(conn_id) {
                if conn.sender.send(message.clone()).is_ok() {
                    sent_count += 1;
                }
            }
        }

        tracing::debug!(
            sender = %sender_conn_id,
            topic = %topic,
            recipients = sent_count,
            "Relayed publish"
        );

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Subscribers of `topic`, if anyone is subscribed.
    pub fn subscriber_count(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(|subscribers| subscribers.len())
    }

    fn remove_subscriber(&self, topic: &str, conn_id: &str) {
        self.topics.remove_if_mut(topic, |_, subscribers| {
            subscribers.remove(conn_id);
            subscribers.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register(tx);
        manager.subscribe(&conn_id, &topics(&["a", "b"]));
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.topic_count(), 2);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.topic_count(), 0);
    }

    #[test]
    fn test_publish_reaches_other_subscribers() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let conn1 = manager.register(tx1);
        let conn2 = manager.register(tx2);
        let _conn3 = manager.register(tx3);
        manager.subscribe(&conn1, &topics(&["room"]));
        manager.subscribe(&conn2, &topics(&["room"]));

        // Publish from conn1 only reaches conn2; conn3 is not subscribed
        let sent = manager.publish(&conn1, "room", json!({"n": 1}));
        assert_eq!(sent, 1);

        assert!(rx1.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
        match rx2.try_recv().unwrap() {
            ServerMessage::Publish {
                topic,
                data,
                clients,
            } => {
                assert_eq!(topic, "room");
                assert_eq!(data, json!({"n": 1}));
                assert_eq!(clients, 2);
            }
            other => panic!("Expected Publish, got {other:?}"),
        }
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let manager = ConnectionManager::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let conn1 = manager.register(tx1);
        let conn2 = manager.register(tx2);
        manager.subscribe(&conn1, &topics(&["room"]));
        manager.subscribe(&conn2, &topics(&["room", "room"]));
        assert_eq!(manager.subscriber_count("room"), Some(2));

        manager.unsubscribe(&conn2, &topics(&["room"]));
        assert_eq!(manager.publish(&conn1, "room", json!(null)), 0);
        assert!(rx2.try_recv().is_err());

        manager.unsubscribe(&conn1, &topics(&["room"]));
        assert_eq!(manager.subscriber_count("room"), None);
    }

    #[test]
    fn test_publish_to_unknown_topic() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = manager.register(tx);
        assert_eq!(manager.publish(&conn, "nobody", json!(1)), 0);
        assert!(manager.send_to(&conn, ServerMessage::Pong));
        assert!(!manager.send_to("missing", ServerMessage::Pong));
    }
}
