use super::{PeerTransport, TransportEvent, TransportFactory, EVENT_CAPACITY};
use crate::config::PeerDiscoveryConfig;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, RelayEvent, RelayRequest};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Builds [`WsTransport`]s.
#[derive(Debug, Clone)]
pub struct WsTransportFactory {
    pub connect_timeout: Duration,
}

impl Default for WsTransportFactory {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self, room: &str, discovery: &PeerDiscoveryConfig) -> Result<Arc<dyn PeerTransport>> {
        if !discovery.relays.is_empty() {
            // relayed through the rendezvous server; no NAT traversal needed
            tracing::debug!(room = %room, relays = discovery.relays.len(), "Ignoring relay servers");
        }
        Ok(Arc::new(WsTransport::new(self.connect_timeout)))
    }
}

struct Link {
    room: String,
    outgoing: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Link {
    fn close(self) {
        self.reader.abort();
        // writer drains what is queued, then closes the socket
        drop(self.outgoing);
        drop(self.writer);
    }
}

/// WebSocket client of the rendezvous server.
///
/// Joining a room subscribes to a topic named after it; envelopes travel as
/// the `data` of topic publishes.
pub struct WsTransport {
    events: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    link: Mutex<Option<Link>>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("connected", &self.is_connected())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            events,
            connected: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
            connect_timeout,
        }
    }

    async fn open(&self, url: &str) -> Result<Socket> {
        match tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok((socket, _))) => Ok(socket),
            Ok(Err(e)) => Err(Error::Transport(format!("{url}: {e}"))),
            Err(_) => Err(Error::Transport(format!("{url}: connect timed out"))),
        }
    }

    fn start(&self, room: &str, url: &str, socket: Socket) -> Result<()> {
        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();

        let subscribe = serde_json::to_string(&RelayRequest::Subscribe {
            topics: vec![room.to_string()],
        })?;
        // queued before the writer starts, so it is the first frame out
        let _ = outgoing.send(Message::Text(subscribe.into()));

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "Failed to send to signaling server");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let events = self.events.clone();
        let connected = self.connected.clone();
        let topic = room.to_string();
        let endpoint = url.to_string();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => relay_frame(&topic, text.as_str(), &events),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(url = %endpoint, error = %e, "Signaling connection error");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Disconnected);
            tracing::info!(url = %endpoint, "Signaling connection closed");
        });

        let previous = self.link.lock().replace(Link {
            room: room.to_string(),
            outgoing,
            writer,
            reader,
        });
        if let Some(previous) = previous {
            previous.close();
        }
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);
        tracing::info!(room = %room, url = %url, "Joined room via signaling server");
        Ok(())
    }
}

fn relay_frame(topic: &str, text: &str, events: &broadcast::Sender<TransportEvent>) {
    match serde_json::from_str::<RelayEvent>(text) {
        Ok(RelayEvent::Publish {
            topic: from_topic,
            data,
            ..
        }) if from_topic == topic => match serde_json::from_value::<Envelope>(data) {
            Ok(envelope) => {
                let _ = events.send(TransportEvent::Message(envelope));
            }
            Err(e) => tracing::warn!(error = %e, "Dropping malformed envelope"),
        },
        Ok(RelayEvent::Publish { .. }) | Ok(RelayEvent::Pong) => {}
        Ok(RelayEvent::Error { message }) => {
            tracing::warn!(message = %message, "Signaling server reported an error")
        }
        Err(e) => tracing::warn!(error = %e, "Failed to parse signaling frame"),
    }
}

impl PeerTransport for WsTransport {
    fn connect<'a>(&'a self, room: &'a str, endpoints: &'a [String]) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut last_error = Error::Transport("no signaling endpoints configured".into());
            for url in endpoints {
                match self.open(url).await {
                    Ok(socket) => return self.start(room, url, socket),
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Signaling endpoint refused");
                        last_error = e;
                    }
                }
            }
            Err(last_error)
        }
        .boxed()
    }

    fn disconnect(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        if let Ok(unsubscribe) = serde_json::to_string(&RelayRequest::Unsubscribe {
            topics: vec![link.room.clone()],
        }) {
            let _ = link.outgoing.send(Message::Text(unsubscribe.into()));
        }
        link.close();
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        let link = self.link.lock();
        let link = link
            .as_ref()
            .ok_or_else(|| Error::Transport("not connected".into()))?;
        let frame = serde_json::to_string(&RelayRequest::Publish {
            topic: link.room.clone(),
            data: serde_json::to_value(envelope)?,
        })?;
        link.outgoing
            .send(Message::Text(frame.into()))
            .map_err(|_| Error::Transport("signaling link closed".into()))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SyncMessage;
    use serde_json::json;

    #[test]
    fn test_relay_frame_filters_topic() {
        let (events, mut rx) = broadcast::channel(8);
        let envelope = Envelope::broadcast(1, SyncMessage::Hello { client: 1 });
        let data = serde_json::to_value(&envelope).unwrap();

        relay_frame(
            "room",
            &json!({"type": "publish", "topic": "other", "data": data}).to_string(),
            &events,
        );
        relay_frame(
            "room",
            &json!({"type": "publish", "topic": "room", "data": data, "clients": 2}).to_string(),
            &events,
        );
        relay_frame("room", "not json", &events);

        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Message(envelope));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_without_endpoints_is_transient() {
        let transport = WsTransport::new(Duration::from_millis(100));
        let result = transport.connect("room", &[]).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = WsTransport::new(Duration::from_millis(500));
        let result = transport
            .connect("room", &[format!("ws://127.0.0.1:{port}")])
            .await;
        assert!(result.is_err_and(|e| e.is_transient()));
    }
}
