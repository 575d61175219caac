//! `rosbridge`-style JSON frames.
//!
//! Remote peers talk to [`WsBridge`][crate::ws_bridge::WsBridge] with the
//! same three operations a `rosbridge_server` understands:
//!
//! ```json
//! {"op": "subscribe",   "topic": "/spatial_mesh"}
//! {"op": "unsubscribe", "topic": "/spatial_mesh"}
//! {"op": "publish",     "topic": "/object_detections_3d", "msg": { ... }}
//! ```
//!
//! Extra fields (`type`, `id`, `throttle_rate`, …) are accepted and ignored.

use meshlink_types::LinkError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Publish { topic: String, msg: Value },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

impl Frame {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`] for invalid JSON, an unknown
    /// `op`, or a missing field.
    pub fn parse(text: &str) -> Result<Self, LinkError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, LinkError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn topic(&self) -> &str {
        match self {
            Frame::Publish { topic, .. }
            | Frame::Subscribe { topic }
            | Frame::Unsubscribe { topic } => topic,
        }
    }
}
