//! [`MeshLink`] – assembles the bridge on top of one [`Transport`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshlink_bridge::{BridgeConfig, MeshLink, OverlaySurface};
//! use meshlink_middleware::{BusTransport, EventBus};
//! use meshlink_types::Point3;
//!
//! struct NullSurface;
//! impl OverlaySurface for NullSurface {
//!     type Handle = ();
//!     fn create_outline(&mut self, _: [Point3; 4]) {}
//!     fn create_label(&mut self, _: &str, _: Point3) {}
//!     fn destroy(&mut self, _: ()) {}
//! }
//!
//! # #[tokio::main] async fn main() -> Result<(), meshlink_types::LinkError> {
//! let transport = Arc::new(BusTransport::new(Arc::new(EventBus::default())));
//! let mut link = MeshLink::start(
//!     transport,
//!     tokio::runtime::Handle::current(),
//!     &BridgeConfig::default(),
//!     NullSurface,
//!     &tracing::Span::current(),
//! )?;
//! // Perception callbacks go to `link.observer()`; the frame loop calls:
//! link.tick();
//! # Ok(()) }
//! ```

use std::sync::Arc;

use meshlink_middleware::{Subscription, Transport};
use tracing::{Span, debug, debug_span, info, info_span};

use crate::config::BridgeConfig;
use crate::inbox::DetectionInbox;
use crate::observer::SpatialObserverAdapter;
use crate::overlay::{OverlayRenderer, OverlaySurface, TickOutcome};
use crate::publisher::{MeshDeltaPublisher, PublisherStats};

pub struct MeshLink<S: OverlaySurface> {
    publisher: Arc<MeshDeltaPublisher>,
    observer: SpatialObserverAdapter,
    renderer: OverlayRenderer<S>,
    inbox: Arc<DetectionInbox>,
    // Held for its Drop: detections stop arriving when the link goes away.
    _detections: Subscription,
}

impl<S: OverlaySurface> MeshLink<S> {
    /// Build every component and subscribe to the detection topic.
    ///
    /// Mesh publishes are spawned onto `runtime`. Components log inside
    /// child spans of `parent`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Config`][meshlink_types::LinkError::Config] for an invalid
    /// `config`, or whatever the transport's `subscribe` returns.
    pub fn start(
        transport: Arc<dyn Transport>,
        runtime: tokio::runtime::Handle,
        config: &BridgeConfig,
        surface: S,
        parent: &Span,
    ) -> Result<Self, meshlink_types::LinkError> {
        config.validate()?;
        let span = info_span!(parent: parent, "meshlink");

        let inbox = Arc::new(DetectionInbox::new(debug_span!(parent: &span, "detection_inbox")));
        let publisher = Arc::new(MeshDeltaPublisher::new(
            Arc::clone(&transport),
            runtime,
            config,
            debug_span!(parent: &span, "mesh_publisher", topic = %config.mesh_topic),
        )?);
        let observer = SpatialObserverAdapter::new(
            publisher.clone(),
            debug_span!(parent: &span, "spatial_observer"),
        )
        .with_removed_memory(config.removed_mesh_memory);
        let renderer = OverlayRenderer::new(
            Arc::clone(&inbox),
            surface,
            config,
            debug_span!(parent: &span, "overlay_renderer"),
        );

        // Runs on the transport's callback task. The previous batch stays
        // live on error.
        let receiver = Arc::clone(&inbox);
        let detections = transport.subscribe(
            &config.detection_topic,
            Box::new(move |body| {
                if let Err(e) = receiver.receive_value(body) {
                    debug!(
                        rejected_total = receiver.rejected_count(),
                        error = %e,
                        "detection message dropped"
                    );
                }
            }),
        )?;

        span.in_scope(|| {
            info!(
                mesh_topic = %config.mesh_topic,
                detection_topic = %config.detection_topic,
                max_in_flight = config.max_in_flight_publishes,
                "mesh link started"
            );
        });

        Ok(Self {
            publisher,
            observer,
            renderer,
            inbox,
            _detections: detections,
        })
    }

    /// Callback target for the perception source.
    pub fn observer(&mut self) -> &mut SpatialObserverAdapter {
        &mut self.observer
    }

    /// Run one render frame.
    pub fn tick(&mut self) -> TickOutcome {
        self.renderer.tick()
    }

    pub fn renderer(&self) -> &OverlayRenderer<S> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut OverlayRenderer<S> {
        &mut self.renderer
    }

    pub fn inbox(&self) -> &Arc<DetectionInbox> {
        &self.inbox
    }

    pub fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats()
    }

    /// Inbound detection messages rejected as undecodable or malformed.
    pub fn rejected_batches(&self) -> u64 {
        self.inbox.rejected_count()
    }
}
