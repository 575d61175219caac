//! Headless, topic-keyed publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! Topics are plain strings (`"/spatial_mesh"`, `"/object_detections_3d"`,
//! …). Each topic gets its own broadcast lane, created the first time
//! anybody publishes or subscribes to it, so traffic on one topic never
//! wakes subscribers of another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use meshlink_types::{Event, LinkError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast lanes.
#[derive(Clone, Debug)]
pub struct EventBus {
    capacity: usize,
    lanes: Arc<Mutex<HashMap<String, broadcast::Sender<Event>>>>,
}

impl EventBus {
    /// Create a new bus with the given per-topic channel capacity.
    ///
    /// A capacity of zero is bumped to one (broadcast channels cannot be
    /// unbuffered).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Channel`] when nobody is subscribed to `topic`.
    pub fn publish_to(&self, topic: &str, event: Event) -> Result<usize, LinkError> {
        self.lane(topic)
            .send(event)
            .map_err(|_| LinkError::Channel(format!("no subscribers for topic {topic}")))
    }

    /// Subscribe to `topic`.
    ///
    /// The returned [`TopicReceiver`] yields only events published to that
    /// topic after this call.
    pub fn subscribe_to(&self, topic: &str) -> TopicReceiver {
        TopicReceiver {
            topic: topic.to_string(),
            receiver: self.lane(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic` (zero for unknown topics).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }

    fn lane(&self, topic: &str) -> broadcast::Sender<Event> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        lanes
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single topic.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The topic this receiver is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
