//! [`MeshDeltaPublisher`] – fire-and-forget background publication of mesh
//! observations.
//!
//! [`MeshDeltaPublisher::publish`] returns immediately. The serialise-and-send
//! work runs as its own Tokio task, so the perception callback that produced
//! the observation never waits on network I/O.
//!
//! # Backpressure
//!
//! Every task holds a permit from a [`Semaphore`] sized by
//! [`BridgeConfig::max_in_flight_publishes`]. When all permits are taken the
//! observation is dropped and [`DispatchOutcome::Saturated`] is returned;
//! when [`BridgeConfig::max_publishes_per_second`] is set, observations above
//! that rate are dropped with [`DispatchOutcome::RateLimited`]. A later
//! update or removal for the same mesh id supersedes anything dropped.
//! Removals are never dropped this way, since nothing comes after them.
//!
//! # Failures
//!
//! A failed send (transport unavailable, encode error) is logged and
//! counted. It is never retried and never reported back to the caller.
//!
//! # Ordering
//!
//! Tasks are independent. Two observations for the same mesh id may reach
//! the transport in either order; receivers that care can compare
//! [`MeshUpdateMessage::sequence`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use meshlink_middleware::Transport;
use meshlink_types::{LinkError, MeshObservation, MeshUpdateMessage};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{Instrument, Span, debug, debug_span, error, warn};

use crate::config::BridgeConfig;

/// What happened to an observation handed to an [`ObservationSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A background send was started.
    Scheduled,
    /// Dropped: too many sends already in flight.
    Saturated,
    /// Dropped: publish rate cap exceeded.
    RateLimited,
}

/// Destination for observations produced by the
/// [`SpatialObserverAdapter`][crate::observer::SpatialObserverAdapter].
pub trait ObservationSink: Send + Sync {
    /// Take ownership of `observation` without blocking.
    fn dispatch(&self, observation: MeshObservation) -> DispatchOutcome;
}

/// Snapshot of publisher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub scheduled: u64,
    pub rejected: u64,
    pub sent: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    rejected: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

/// State shared with every in-flight send task.
struct Shared {
    transport: Arc<dyn Transport>,
    topic: String,
    counters: Counters,
}

impl Shared {
    async fn send(&self, observation: MeshObservation) {
        let message = MeshUpdateMessage::from(&observation);
        drop(observation);

        let body = match serde_json::to_value(&message) {
            Ok(body) => body,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "mesh update encode failed");
                return;
            }
        };

        match self.transport.publish(&self.topic, body).await {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(triangles = message.triangles.len() / 3, "mesh update sent");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "mesh update dropped");
            }
        }
    }
}

pub struct MeshDeltaPublisher {
    shared: Arc<Shared>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    limiter: Option<DefaultDirectRateLimiter>,
    span: Span,
}

impl MeshDeltaPublisher {
    /// Create a publisher that spawns its sends onto `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Config`] when `config` fails validation.
    pub fn new(
        transport: Arc<dyn Transport>,
        runtime: Handle,
        config: &BridgeConfig,
        span: Span,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        let limiter = config
            .max_publishes_per_second
            .and_then(NonZeroU32::new)
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                topic: config.mesh_topic.clone(),
                counters: Counters::default(),
            }),
            runtime,
            permits: Arc::new(Semaphore::new(config.max_in_flight_publishes)),
            max_in_flight: config.max_in_flight_publishes,
            limiter,
            span,
        })
    }

    /// Start a background send of `observation` and return at once.
    ///
    /// Removals bypass both the rate cap and the in-flight cap: nothing
    /// later can supersede them. There is at most one per tracked mesh.
    pub fn publish(&self, observation: MeshObservation) -> DispatchOutcome {
        let permit = if observation.removed() {
            None
        } else {
            match self.admit(&observation) {
                Ok(permit) => Some(permit),
                Err(outcome) => return outcome,
            }
        };

        self.shared.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        let task_span = debug_span!(
            parent: &self.span,
            "publish_mesh",
            mesh_id = observation.id(),
            sequence = observation.sequence(),
            removed = observation.removed(),
        );
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(
            async move {
                let _permit = permit;
                shared.send(observation).await;
            }
            .instrument(task_span),
        );
        DispatchOutcome::Scheduled
    }

    fn admit(&self, observation: &MeshObservation) -> Result<OwnedSemaphorePermit, DispatchOutcome> {
        let counters = &self.shared.counters;

        if let Some(limiter) = &self.limiter
            && limiter.check().is_err()
        {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            self.span.in_scope(|| {
                warn!(mesh_id = observation.id(), "publish rate exceeded; dropping mesh update");
            });
            return Err(DispatchOutcome::RateLimited);
        }

        Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            self.span.in_scope(|| {
                warn!(
                    mesh_id = observation.id(),
                    max_in_flight = self.max_in_flight,
                    "publisher saturated; dropping mesh update"
                );
            });
            DispatchOutcome::Saturated
        })
    }

    pub fn stats(&self) -> PublisherStats {
        let c = &self.shared.counters;
        PublisherStats {
            scheduled: c.scheduled.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Number of gated (non-removal) sends currently running.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }
}

impl ObservationSink for MeshDeltaPublisher {
    fn dispatch(&self, observation: MeshObservation) -> DispatchOutcome {
        self.publish(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshlink_middleware::{MessageCallback, Subscription};
    use meshlink_types::Point3;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transport that records publishes, optionally failing them or holding
    /// them until the gate is opened.
    #[derive(Default)]
    struct RecordingTransport {
        published: Mutex<Vec<(String, Value)>>,
        fail: bool,
        gate: Option<Semaphore>,
    }

    impl RecordingTransport {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn published(&self) -> Vec<(String, Value)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, topic: &str, message: Value) -> Result<(), LinkError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail {
                return Err(LinkError::TransportUnavailable("link down".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), message));
            Ok(())
        }

        fn subscribe(&self, _topic: &str, _cb: MessageCallback) -> Result<Subscription, LinkError> {
            Err(LinkError::Channel("not supported".to_string()))
        }
    }

    fn observation(id: i64, sequence: u64) -> MeshObservation {
        let verts = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        MeshObservation::new(id, verts, vec![0, 1, 2], sequence).unwrap()
    }

    fn publisher(transport: Arc<RecordingTransport>, config: &BridgeConfig) -> MeshDeltaPublisher {
        MeshDeltaPublisher::new(transport, Handle::current(), config, Span::none()).unwrap()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publish_sends_mesh_update_on_configured_topic() {
        let transport = Arc::new(RecordingTransport::default());
        let publisher = publisher(Arc::clone(&transport), &BridgeConfig::default());

        assert_eq!(publisher.publish(observation(7, 3)), DispatchOutcome::Scheduled);
        wait_until(|| publisher.stats().sent == 1).await;

        let published = transport.published();
        assert_eq!(published.len(), 1);
        let (topic, body) = &published[0];
        assert_eq!(topic, "/spatial_mesh");
        assert_eq!(body["id"], 7);
        assert_eq!(body["sequence"], 3);
        assert_eq!(body["removed"], false);
        assert_eq!(body["points"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn transport_failure_is_counted_not_propagated() {
        let transport = Arc::new(RecordingTransport::failing());
        let publisher = publisher(Arc::clone(&transport), &BridgeConfig::default());

        assert_eq!(publisher.publish(observation(1, 0)), DispatchOutcome::Scheduled);
        assert_eq!(publisher.publish(observation(1, 1)), DispatchOutcome::Scheduled);
        wait_until(|| publisher.stats().failed == 2).await;

        let stats = publisher.stats();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.scheduled, 2);
        assert!(transport.published().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saturated_publisher_drops_observations() {
        let transport = Arc::new(RecordingTransport::gated());
        let config = BridgeConfig {
            max_in_flight_publishes: 2,
            ..BridgeConfig::default()
        };
        let publisher = publisher(Arc::clone(&transport), &config);

        assert_eq!(publisher.publish(observation(1, 0)), DispatchOutcome::Scheduled);
        assert_eq!(publisher.publish(observation(2, 1)), DispatchOutcome::Scheduled);
        assert_eq!(publisher.publish(observation(3, 2)), DispatchOutcome::Saturated);
        assert_eq!(publisher.in_flight(), 2);

        // Release the two held sends; capacity comes back.
        transport.gate.as_ref().unwrap().add_permits(2);
        wait_until(|| publisher.stats().sent == 2).await;
        wait_until(|| publisher.in_flight() == 0).await;

        transport.gate.as_ref().unwrap().add_permits(1);
        assert_eq!(publisher.publish(observation(3, 3)), DispatchOutcome::Scheduled);
        wait_until(|| publisher.stats().sent == 3).await;

        let stats = publisher.stats();
        assert_eq!(stats.rejected, 1);
        let ids: Vec<i64> = transport
            .published()
            .iter()
            .map(|(_, body)| body["id"].as_i64().unwrap())
            .collect();
        assert!(ids.contains(&3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rate_limit_rejects_burst_beyond_quota() {
        let transport = Arc::new(RecordingTransport::default());
        let config = BridgeConfig {
            max_publishes_per_second: Some(2),
            ..BridgeConfig::default()
        };
        let publisher = publisher(Arc::clone(&transport), &config);

        let outcomes: Vec<DispatchOutcome> =
            (0..5).map(|i| publisher.publish(observation(i, i as u64))).collect();
        let scheduled = outcomes
            .iter()
            .filter(|o| **o == DispatchOutcome::Scheduled)
            .count();
        assert_eq!(scheduled, 2);
        assert!(outcomes.contains(&DispatchOutcome::RateLimited));
        assert_eq!(publisher.stats().rejected, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removal_is_sent_while_saturated() {
        let transport = Arc::new(RecordingTransport::gated());
        let config = BridgeConfig {
            max_in_flight_publishes: 1,
            ..BridgeConfig::default()
        };
        let publisher = publisher(Arc::clone(&transport), &config);

        assert_eq!(publisher.publish(observation(1, 0)), DispatchOutcome::Scheduled);
        assert_eq!(publisher.publish(observation(1, 1)), DispatchOutcome::Saturated);
        assert_eq!(
            publisher.publish(MeshObservation::removal(1, 2)),
            DispatchOutcome::Scheduled
        );

        transport.gate.as_ref().unwrap().add_permits(2);
        wait_until(|| publisher.stats().sent == 2).await;

        let removals: Vec<u64> = transport
            .published()
            .iter()
            .filter(|(_, body)| body["removed"] == true)
            .map(|(_, body)| body["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(removals, vec![2]);
        assert_eq!(publisher.stats().rejected, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removal_is_not_rate_limited() {
        let transport = Arc::new(RecordingTransport::default());
        let config = BridgeConfig {
            max_publishes_per_second: Some(1),
            ..BridgeConfig::default()
        };
        let publisher = publisher(Arc::clone(&transport), &config);

        assert_eq!(publisher.publish(observation(4, 0)), DispatchOutcome::Scheduled);
        assert_eq!(publisher.publish(observation(4, 1)), DispatchOutcome::RateLimited);
        assert_eq!(
            publisher.publish(MeshObservation::removal(4, 2)),
            DispatchOutcome::Scheduled
        );
        wait_until(|| publisher.stats().sent == 2).await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = BridgeConfig {
            max_in_flight_publishes: 0,
            ..BridgeConfig::default()
        };
        let result = MeshDeltaPublisher::new(
            Arc::new(RecordingTransport::default()),
            Handle::current(),
            &config,
            Span::none(),
        );
        assert!(matches!(result, Err(LinkError::Config(_))));
    }
}
