//! `meshlink-bridge` – the bidirectional spatial bridge.
//!
//! Connects an incrementally-updated 3-D mesh observer to a pub/sub
//! [`Transport`][meshlink_middleware::Transport] in both directions:
//!
//! ```text
//! perception source ─▶ SpatialObserverAdapter ─▶ MeshDeltaPublisher ─▶ transport
//! transport ─▶ DetectionInbox ─▶ OverlayRenderer (per frame) ─▶ overlay surface
//! ```
//!
//! # Modules
//!
//! - [`observer`] – [`SpatialObserverAdapter`]: copies callback-scoped mesh
//!   geometry into owned [`MeshObservation`][meshlink_types::MeshObservation]s
//!   and tracks each mesh id through add → update → remove.
//! - [`publisher`] – [`MeshDeltaPublisher`]: fire-and-forget background
//!   publication, bounded by an in-flight cap and an optional rate limit.
//! - [`inbox`] – [`DetectionInbox`]: single-slot, mutex-guarded hand-off of
//!   the latest detection batch with consume-once semantics.
//! - [`overlay`] – [`OverlayRenderer`]: per-frame consumer that tears down
//!   and rebuilds the overlay artifacts whenever a new batch arrives.
//! - [`link`] – [`MeshLink`]: wires all of the above onto one transport.
//! - [`config`] – [`BridgeConfig`].
//! - [`rate`] – [`RateTracker`]: rolling-window rate estimate.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: process-wide
//!   `tracing` setup with optional OTLP export.
//!
//! Components never reach for a global logger: each takes a
//! [`tracing::Span`] at construction and logs inside it.

pub mod config;
pub mod inbox;
pub mod link;
pub mod observer;
pub mod overlay;
pub mod publisher;
pub mod rate;
pub mod telemetry;

pub use config::BridgeConfig;
pub use inbox::DetectionInbox;
pub use link::MeshLink;
pub use observer::{MeshSnapshot, MeshTrackState, SpatialObserverAdapter};
pub use overlay::{ArtifactKind, OverlayArtifact, OverlayRenderer, OverlaySurface, TickOutcome};
pub use publisher::{DispatchOutcome, MeshDeltaPublisher, ObservationSink, PublisherStats};
pub use rate::RateTracker;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
