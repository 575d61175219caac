//! [`OverlayRenderer`] – per-frame detection overlay consumer.
//!
//! Call [`OverlayRenderer::tick`] once per frame from the render thread.
//! Each tick asks the [`DetectionInbox`] for an unconsumed batch:
//!
//! * none → nothing changes; the overlays from the last batch stay up.
//! * some → every current artifact is destroyed, then one outline and one
//!   label are created per detected object, in batch order.
//!
//! There is no diffing against the previous set, so a box from an older
//! batch can never survive a newer one.
//!
//! Drawing is delegated to an [`OverlaySurface`] supplied by the host.

use std::sync::Arc;

use meshlink_types::{DetectionBatch, Point3};
use tracing::{Span, debug};

use crate::config::BridgeConfig;
use crate::inbox::DetectionInbox;
use crate::rate::RateTracker;

/// A display that can create and destroy overlay primitives.
pub trait OverlaySurface {
    /// Opaque handle to a created primitive.
    type Handle;

    /// Create a closed outline through `corners` (left, top, right, bottom).
    fn create_outline(&mut self, corners: [Point3; 4]) -> Self::Handle;

    /// Create a text label anchored at `position`.
    fn create_label(&mut self, text: &str, position: Point3) -> Self::Handle;

    /// Remove a previously created primitive.
    fn destroy(&mut self, handle: Self::Handle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Outline,
    Label,
}

/// One displayed primitive, owned by the renderer.
#[derive(Debug)]
pub struct OverlayArtifact<H> {
    pub kind: ArtifactKind,
    /// Label of the detected object this artifact represents.
    pub object_label: String,
    handle: H,
}

impl<H> OverlayArtifact<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// Result of one [`OverlayRenderer::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No new batch; overlays left as they were.
    Unchanged,
    /// A new batch was consumed and the overlay set rebuilt.
    Rebuilt { destroyed: usize, objects: usize },
}

pub struct OverlayRenderer<S: OverlaySurface> {
    inbox: Arc<DetectionInbox>,
    surface: S,
    artifacts: Vec<OverlayArtifact<S::Handle>>,
    label_offset: Point3,
    batch_rate: RateTracker,
    span: Span,
}

impl<S: OverlaySurface> OverlayRenderer<S> {
    pub fn new(inbox: Arc<DetectionInbox>, surface: S, config: &BridgeConfig, span: Span) -> Self {
        Self {
            inbox,
            surface,
            artifacts: Vec::new(),
            label_offset: config.label_offset,
            batch_rate: RateTracker::new(config.rate_window),
            span,
        }
    }

    /// Run one frame.
    pub fn tick(&mut self) -> TickOutcome {
        let Some(batch) = self.inbox.take_if_unconsumed() else {
            return TickOutcome::Unchanged;
        };
        self.batch_rate.tick();
        let destroyed = self.clear();
        self.build(&batch);

        let rate_hz = self.batch_rate.rate_avg();
        self.span.in_scope(|| {
            debug!(destroyed, objects = batch.len(), ?rate_hz, "overlay set rebuilt");
        });
        TickOutcome::Rebuilt {
            destroyed,
            objects: batch.len(),
        }
    }

    /// Destroy every current artifact. Returns how many were destroyed.
    pub fn clear(&mut self) -> usize {
        let destroyed = self.artifacts.len();
        for artifact in self.artifacts.drain(..) {
            self.surface.destroy(artifact.handle);
        }
        destroyed
    }

    fn build(&mut self, batch: &DetectionBatch) {
        self.artifacts.reserve(batch.len() * 2);
        for object in &batch.objects {
            let outline = self.surface.create_outline(object.corners());
            self.artifacts.push(OverlayArtifact {
                kind: ArtifactKind::Outline,
                object_label: object.label.clone(),
                handle: outline,
            });

            let anchor = object.left.offset(self.label_offset);
            let label = self.surface.create_label(&object.label, anchor);
            self.artifacts.push(OverlayArtifact {
                kind: ArtifactKind::Label,
                object_label: object.label.clone(),
                handle: label,
            });
        }
    }

    pub fn artifacts(&self) -> &[OverlayArtifact<S::Handle>] {
        &self.artifacts
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.artifacts.iter().filter(|a| a.kind == kind).count()
    }

    /// Average rate at which new batches have been consumed, in Hz.
    pub fn batch_rate(&self) -> Option<f64> {
        self.batch_rate.rate_avg()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}
