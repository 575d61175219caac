//! `meshlink-types` – shared data model for the MeshLink bridge.
//!
//! Everything that crosses a crate boundary lives here: geometry
//! ([`Point3`]), outbound mesh deltas ([`MeshObservation`]), inbound
//! detections ([`DetectionBatch`]), the bus [`Event`] envelope and the
//! workspace-wide [`LinkError`].
//!
//! The JSON wire shapes exchanged with the remote transport are in [`wire`].

pub mod wire;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use wire::{DetectionSetMessage, MeshUpdateMessage};

/// A point in the shared 3-D tracking space (metres).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    /// Create a new point.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise sum.
    pub fn offset(self, by: Point3) -> Self {
        Self::new(self.x + by.x, self.y + by.y, self.z + by.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Mesh observations (outbound)
// ────────────────────────────────────────────────────────────────────────────

/// One add/update/remove event for a piece of reconstructed surface.
///
/// Built from a one-time copy of the perception source's buffers and never
/// mutated afterwards, so it can be moved freely into a background send.
///
/// ```
/// use meshlink_types::{MeshObservation, Point3};
///
/// let tri = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
/// let obs = MeshObservation::new(7, tri, vec![0, 1, 2], 0).unwrap();
/// assert_eq!(obs.triangle_count(), 1);
/// assert!(!obs.removed());
///
/// assert!(MeshObservation::new(7, vec![], vec![0, 1], 1).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MeshObservation {
    id: i64,
    sequence: u64,
    vertices: Vec<Point3>,
    triangle_indices: Vec<u32>,
    removed: bool,
}

impl MeshObservation {
    /// Build an add/update observation.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidMesh`] when the index list length is not a
    /// multiple of three.
    pub fn new(
        id: i64,
        vertices: Vec<Point3>,
        triangle_indices: Vec<u32>,
        sequence: u64,
    ) -> Result<Self, LinkError> {
        if triangle_indices.len() % 3 != 0 {
            return Err(LinkError::InvalidMesh(format!(
                "mesh {id} has {} triangle indices, not a multiple of 3",
                triangle_indices.len()
            )));
        }
        Ok(Self {
            id,
            sequence,
            vertices,
            triangle_indices,
            removed: false,
        })
    }

    /// Build the terminal removal observation for `id`. Carries no geometry.
    pub fn removal(id: i64, sequence: u64) -> Self {
        Self {
            id,
            sequence,
            vertices: Vec::new(),
            triangle_indices: Vec::new(),
            removed: true,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Per-adapter monotonically increasing stamp. Receivers may use it to
    /// discard an update that arrives after a newer one for the same id.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn vertices(&self) -> &[Point3] {
        &self.vertices
    }

    pub fn triangle_indices(&self) -> &[u32] {
        &self.triangle_indices
    }

    pub fn removed(&self) -> bool {
        self.removed
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_indices.len() / 3
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detections (inbound)
// ────────────────────────────────────────────────────────────────────────────

/// One detected object: four box corners plus its class label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub left: Point3,
    pub top: Point3,
    pub right: Point3,
    pub bottom: Point3,
    pub label: String,
}

impl DetectedObject {
    /// Corners in outline order: left, top, right, bottom.
    pub fn corners(&self) -> [Point3; 4] {
        [self.left, self.top, self.right, self.bottom]
    }
}

/// A complete snapshot of everything currently detected.
///
/// A new batch replaces the previous one wholesale. Because every entry
/// bundles its own corners and label, a constructed batch cannot carry
/// mismatched counts; the check happens when decoding
/// [`DetectionSetMessage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub objects: Vec<DetectedObject>,
}

impl DetectionBatch {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self { objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"meshlink-middleware::ws/<peer>"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A transport message body, opaque to the bus.
    Message(serde_json::Value),
    /// An operator-visible notice (shutdown, bridge faults).
    Alert { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type. None of these are fatal to the host process;
/// callers log them and carry on with stale or missing visual state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(
        "Malformed detection batch: {left} left, {top} top, {right} right, {bottom} bottom corners for {labels} labels"
    )]
    MalformedBatch {
        left: usize,
        top: usize,
        right: usize,
        bottom: usize,
        labels: usize,
    },

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Serialization(e.to_string())
    }
}
