//! The transport seam.
//!
//! The bridge core never speaks to a network library directly. It holds an
//! `Arc<dyn Transport>` and calls [`Transport::publish`] /
//! [`Transport::subscribe`]; whatever sits behind the trait (the in-process
//! [`BusTransport`], a WebSocket peer exposed through
//! [`WsBridge`][crate::ws_bridge::WsBridge], a test double) decides how the
//! bytes move.

use std::sync::Arc;

use async_trait::async_trait;
use meshlink_types::{Event, EventPayload, LinkError};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::EventBus;

/// Callback invoked for every message received on a subscribed topic.
///
/// Runs on the transport's own task, never on the caller's thread.
pub type MessageCallback = Box<dyn Fn(Value) + Send + Sync + 'static>;

/// A pub/sub transport.
///
/// # Contract
///
/// * `publish` – fire-and-forget delivery of `message` on `topic`. An error
///   means this one message was not sent; callers do not retry.
///
/// * `subscribe` – register `callback` for every later message on `topic`.
///   Delivery stops when the returned [`Subscription`] is dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` on `topic`.
    async fn publish(&self, topic: &str, message: Value) -> Result<(), LinkError>;

    /// Deliver every message arriving on `topic` to `callback`.
    fn subscribe(&self, topic: &str, callback: MessageCallback) -> Result<Subscription, LinkError>;
}

/// Handle for an active subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wrap the task that drives deliveries for `topic`.
    pub fn new(topic: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            topic: topic.into(),
            task,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BusTransport
// ────────────────────────────────────────────────────────────────────────────

/// [`Transport`] over the in-process [`EventBus`].
///
/// Remote peers reach the same bus through
/// [`WsBridge`][crate::ws_bridge::WsBridge], so this is also the transport the
/// `meshlink` binary hands to the bridge core.
#[derive(Clone)]
pub struct BusTransport {
    bus: Arc<EventBus>,
    source: String,
}

impl BusTransport {
    /// Create a transport that publishes with the default source label.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_source(bus, "meshlink-middleware::bus")
    }

    /// Create a transport whose published events carry `source`.
    pub fn with_source(bus: Arc<EventBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }
}

#[async_trait]
impl Transport for BusTransport {
    async fn publish(&self, topic: &str, message: Value) -> Result<(), LinkError> {
        let event = Event::new(self.source.clone(), EventPayload::Message(message));
        self.bus
            .publish_to(topic, event)
            .map(|_| ())
            .map_err(|e| LinkError::TransportUnavailable(e.to_string()))
    }

    /// Requires a Tokio runtime: the delivery loop is spawned onto it.
    fn subscribe(&self, topic: &str, callback: MessageCallback) -> Result<Subscription, LinkError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LinkError::Channel(format!("subscribe to {topic} outside a runtime: {e}")))?;

        // Register the receiver before spawning so nothing published after
        // this call returns can be missed.
        let mut rx = self.bus.subscribe_to(topic);
        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.payload {
                        EventPayload::Message(body) => callback(body),
                        EventPayload::Alert { .. } => {
                            debug!(topic = %rx.topic(), "ignoring alert on message topic");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %rx.topic(), lagged_by = n, "subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(topic, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn publish_without_subscribers_is_transport_unavailable() {
        let transport = BusTransport::new(Arc::new(EventBus::default()));
        let err = transport
            .publish("/spatial_mesh", json!({ "id": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn subscribe_delivers_message_bodies() -> Result<(), Box<dyn std::error::Error>> {
        let transport = BusTransport::new(Arc::new(EventBus::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sub = transport.subscribe(
            "/object_detections_3d",
            Box::new(move |body| {
                let _ = tx.send(body);
            }),
        )?;
        assert_eq!(sub.topic(), "/object_detections_3d");

        transport
            .publish("/object_detections_3d", json!({ "object_labels": ["cup"] }))
            .await?;

        let body = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await?
            .ok_or("callback channel closed")?;
        assert_eq!(body["object_labels"][0], "cup");
        Ok(())
    }

    #[tokio::test]
    async fn dropping_subscription_stops_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(EventBus::default());
        let transport = BusTransport::new(Arc::clone(&bus));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sub = transport.subscribe(
            "/t",
            Box::new(move |body| {
                let _ = tx.send(body);
            }),
        )?;
        drop(sub);
        // Let the aborted task unwind and release its receiver.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(transport.publish("/t", json!(1)).await.is_err());
        assert!(rx.recv().await.is_none(), "callback must have been dropped");
        Ok(())
    }

    #[test]
    fn subscribe_outside_runtime_is_an_error() {
        let transport = BusTransport::new(Arc::new(EventBus::default()));
        let result = transport.subscribe("/t", Box::new(|_| {}));
        assert!(matches!(result, Err(LinkError::Channel(_))));
    }
}
