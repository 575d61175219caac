//! WebSocket bridge between remote peers and the internal [`EventBus`].
//!
//! [`WsBridge`] serves a WebSocket endpoint that speaks
//! [`rosbridge`][crate::rosbridge] frames:
//!
//! 1. **Downstream** – a peer sends `subscribe` for a topic and from then on
//!    receives every bus event on that topic as a `publish` frame. This is
//!    how mesh updates leave the process.
//!
//! 2. **Upstream** – a peer sends `publish` frames, which are injected onto
//!    the bus under the frame's topic. This is how detection sets arrive.
//!
//! The bridge does not look inside message bodies; it only handles framing
//! and routing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use meshlink_types::{Event, EventPayload, LinkError};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, TopicReceiver};
use crate::rosbridge::Frame;

/// Frames buffered per client before forwarding tasks start waiting.
const OUTBOUND_QUEUE: usize = 256;

/// WebSocket front-end for the [`EventBus`].
#[derive(Clone)]
pub struct WsBridge {
    bus: Arc<EventBus>,
}

impl WsBridge {
    /// Create a new bridge backed by `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Start a WebSocket server on `addr`.
    ///
    /// Each connecting peer gets its own session; the server runs until it
    /// encounters a fatal bind error.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::TransportUnavailable`] if the TCP listener cannot
    /// be bound.
    pub async fn run(self, addr: SocketAddr) -> Result<(), LinkError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            LinkError::TransportUnavailable(format!("ws bind error on {addr}: {e}"))
        })?;
        info!(%addr, "ws bridge listening");
        self.serve(listener).await
    }

    /// Accept peers on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), LinkError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), LinkError> {
        let ws_stream = accept_async(stream).await.map_err(|e| {
            LinkError::TransportUnavailable(format!("ws handshake from {peer}: {e}"))
        })?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let mut session = Session::new(Arc::clone(&self.bus), peer.to_string(), out_tx);

        loop {
            tokio::select! {
                // Forward subscribed bus traffic to the peer.
                Some(text) = out_rx.recv() => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Handle incoming WebSocket frames.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()),
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-peer session
// ---------------------------------------------------------------------------

/// Routing state for one connected peer. Forwarding tasks are aborted when
/// the session is dropped.
pub(crate) struct Session {
    bus: Arc<EventBus>,
    source: String,
    outbound: mpsc::Sender<String>,
    forwards: HashMap<String, JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(bus: Arc<EventBus>, peer: String, outbound: mpsc::Sender<String>) -> Self {
        Self {
            bus,
            source: format!("meshlink-middleware::ws/{peer}"),
            outbound,
            forwards: HashMap::new(),
        }
    }

    /// Apply one text frame from the peer. Malformed frames are logged and
    /// dropped; the connection stays up.
    pub(crate) fn handle_text(&mut self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(source = %self.source, error = %e, "ignoring malformed ws frame");
                return;
            }
        };

        match frame {
            Frame::Publish { topic, msg } => {
                let event = Event::new(self.source.clone(), EventPayload::Message(msg));
                if let Err(e) = self.bus.publish_to(&topic, event) {
                    debug!(topic = %topic, error = %e, "inbound frame had no local subscriber");
                }
            }
            Frame::Subscribe { topic } => {
                if self.forwards.contains_key(&topic) {
                    return;
                }
                let rx = self.bus.subscribe_to(&topic);
                let task = tokio::spawn(forward_topic(rx, self.outbound.clone()));
                self.forwards.insert(topic, task);
            }
            Frame::Unsubscribe { topic } => {
                if let Some(task) = self.forwards.remove(&topic) {
                    task.abort();
                }
            }
        }
    }

    #[cfg(test)]
    fn subscribed_topics(&self) -> usize {
        self.forwards.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for (_, task) in self.forwards.drain() {
            task.abort();
        }
    }
}

/// Relay every event on `rx` to the peer as a `publish` frame until either
/// side closes.
async fn forward_topic(mut rx: TopicReceiver, outbound: mpsc::Sender<String>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(topic = %rx.topic(), lagged_by = n, "ws forward lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let msg = match event.payload {
            EventPayload::Message(body) => body,
            EventPayload::Alert { component, message } => {
                json!({ "component": component, "message": message })
            }
        };
        let frame = Frame::Publish {
            topic: rx.topic().to_string(),
            msg,
        };
        match frame.to_text() {
            Ok(text) => {
                if outbound.send(text).await.is_err() {
                    break;
                }
            }
            Err(e) => error!(topic = %rx.topic(), error = %e, "ws frame encode failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    fn make_session() -> (Arc<EventBus>, Session, mpsc::Receiver<String>) {
        let bus = Arc::new(EventBus::default());
        let (tx, rx) = mpsc::channel(16);
        let session = Session::new(Arc::clone(&bus), "127.0.0.1:5000".to_string(), tx);
        (bus, session, rx)
    }

    #[tokio::test]
    async fn inbound_publish_is_injected_onto_bus() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, mut session, _out) = make_session();
        let mut rx = bus.subscribe_to("/object_detections_3d");

        session.handle_text(
            r#"{"op":"publish","topic":"/object_detections_3d","msg":{"object_labels":["cup"]}}"#,
        );

        let event = rx.recv().await?;
        assert_eq!(event.source, "meshlink-middleware::ws/127.0.0.1:5000");
        match event.payload {
            EventPayload::Message(body) => assert_eq!(body["object_labels"][0], "cup"),
            other => panic!("expected Message, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn subscribed_topic_is_forwarded_as_publish_frame()
    -> Result<(), Box<dyn std::error::Error>> {
        let (bus, mut session, mut out) = make_session();
        session.handle_text(r#"{"op":"subscribe","topic":"/spatial_mesh"}"#);
        // Subscribing twice keeps a single forwarder.
        session.handle_text(r#"{"op":"subscribe","topic":"/spatial_mesh"}"#);
        assert_eq!(session.subscribed_topics(), 1);

        bus.publish_to(
            "/spatial_mesh",
            Event::new("test", EventPayload::Message(json!({ "id": 9 }))),
        )?;

        let text = tokio::time::timeout(Duration::from_secs(1), out.recv())
            .await?
            .ok_or("outbound closed")?;
        let frame: Value = serde_json::from_str(&text)?;
        assert_eq!(frame["op"], "publish");
        assert_eq!(frame["topic"], "/spatial_mesh");
        assert_eq!(frame["msg"]["id"], 9);
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribe_stops_forwarding() {
        let (bus, mut session, mut out) = make_session();
        session.handle_text(r#"{"op":"subscribe","topic":"/spatial_mesh"}"#);
        session.handle_text(r#"{"op":"unsubscribe","topic":"/spatial_mesh"}"#);
        assert_eq!(session.subscribed_topics(), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = bus.publish_to(
            "/spatial_mesh",
            Event::new("test", EventPayload::Message(json!({ "id": 1 }))),
        );

        let result = tokio::time::timeout(Duration::from_millis(50), out.recv()).await;
        assert!(result.is_err(), "no frame expected after unsubscribe");
    }

    #[tokio::test]
    async fn malformed_frame_is_ignored() {
        let (bus, mut session, _out) = make_session();
        let mut rx = bus.subscribe_to("/object_detections_3d");

        session.handle_text("not json at all");
        session.handle_text(r#"{"op":"publish"}"#);

        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "malformed frames must not reach the bus");
        assert_eq!(session.subscribed_topics(), 0);
    }
}
