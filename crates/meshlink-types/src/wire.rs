//! JSON message shapes exchanged with the remote pub/sub transport.
//!
//! | Direction | Message | Default topic |
//! |---|---|---|
//! | outbound | [`MeshUpdateMessage`] | `/spatial_mesh` |
//! | inbound | [`DetectionSetMessage`] | `/object_detections_3d` |
//!
//! The inbound detection message carries its boxes as five parallel lists,
//! so decoding it into a [`DetectionBatch`] is where count mismatches are
//! caught.

use serde::{Deserialize, Serialize};

use crate::{DetectedObject, DetectionBatch, LinkError, MeshObservation, Point3};

/// Outbound mesh delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshUpdateMessage {
    pub id: i64,
    pub removed: bool,
    pub sequence: u64,
    pub triangles: Vec<u32>,
    pub points: Vec<Point3>,
}

impl From<&MeshObservation> for MeshUpdateMessage {
    fn from(obs: &MeshObservation) -> Self {
        Self {
            id: obs.id(),
            removed: obs.removed(),
            sequence: obs.sequence(),
            triangles: obs.triangle_indices().to_vec(),
            points: obs.vertices().to_vec(),
        }
    }
}

/// Inbound set of 3-D detections, one index per object across every list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSetMessage {
    #[serde(default)]
    pub left: Vec<Point3>,
    #[serde(default)]
    pub top: Vec<Point3>,
    #[serde(default)]
    pub right: Vec<Point3>,
    #[serde(default)]
    pub bottom: Vec<Point3>,
    #[serde(default)]
    pub object_labels: Vec<String>,
}

impl TryFrom<DetectionSetMessage> for DetectionBatch {
    type Error = LinkError;

    fn try_from(msg: DetectionSetMessage) -> Result<Self, Self::Error> {
        let n = msg.object_labels.len();
        if msg.left.len() != n || msg.top.len() != n || msg.right.len() != n || msg.bottom.len() != n
        {
            return Err(LinkError::MalformedBatch {
                left: msg.left.len(),
                top: msg.top.len(),
                right: msg.right.len(),
                bottom: msg.bottom.len(),
                labels: n,
            });
        }

        let objects = msg
            .left
            .into_iter()
            .zip(msg.top)
            .zip(msg.right)
            .zip(msg.bottom)
            .zip(msg.object_labels)
            .map(|((((left, top), right), bottom), label)| DetectedObject {
                left,
                top,
                right,
                bottom,
                label,
            })
            .collect();

        Ok(DetectionBatch::new(objects))
    }
}

impl From<&DetectionBatch> for DetectionSetMessage {
    fn from(batch: &DetectionBatch) -> Self {
        let mut msg = DetectionSetMessage::default();
        for obj in &batch.objects {
            msg.left.push(obj.left);
            msg.top.push(obj.top);
            msg.right.push(obj.right);
            msg.bottom.push(obj.bottom);
            msg.object_labels.push(obj.label.clone());
        }
        msg
    }
}
