//! Bridge configuration.

use meshlink_types::{LinkError, Point3};
use serde::{Deserialize, Serialize};

/// Tunables for [`MeshLink`][crate::link::MeshLink] and its components.
///
/// Every field has a default, so a partial TOML table deserialises cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Outbound topic for mesh updates.
    pub mesh_topic: String,

    /// Inbound topic carrying detection sets.
    pub detection_topic: String,

    /// Upper bound on concurrently running mesh publishes. Observations
    /// arriving while the bound is reached are dropped.
    pub max_in_flight_publishes: usize,

    /// Optional cap on scheduled publishes per second.
    pub max_publishes_per_second: Option<u32>,

    /// Offset from an object's left corner to its label anchor.
    pub label_offset: Point3,

    /// Number of samples used by rate estimates.
    pub rate_window: usize,

    /// How many removed mesh ids are remembered so that late events for
    /// them are ignored. Oldest ids are forgotten first.
    pub removed_mesh_memory: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mesh_topic: "/spatial_mesh".to_string(),
            detection_topic: "/object_detections_3d".to_string(),
            max_in_flight_publishes: 64,
            max_publishes_per_second: None,
            label_offset: Point3::new(0.0, 0.02, 0.0),
            rate_window: 10,
            removed_mesh_memory: 4096,
        }
    }
}

impl BridgeConfig {
    /// # Errors
    ///
    /// Returns [`LinkError::Config`] for empty topics, identical in/out
    /// topics, or zero limits.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.mesh_topic.is_empty() || self.detection_topic.is_empty() {
            return Err(LinkError::Config("topics must not be empty".to_string()));
        }
        if self.mesh_topic == self.detection_topic {
            return Err(LinkError::Config(format!(
                "mesh and detection topics must differ (both are {})",
                self.mesh_topic
            )));
        }
        if self.max_in_flight_publishes == 0 {
            return Err(LinkError::Config(
                "max_in_flight_publishes must be at least 1".to_string(),
            ));
        }
        if self.max_publishes_per_second == Some(0) {
            return Err(LinkError::Config(
                "max_publishes_per_second must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_in_flight_is_rejected() {
        let cfg = BridgeConfig {
            max_in_flight_publishes: 0,
            ..BridgeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(LinkError::Config(_))));
    }

    #[test]
    fn shared_topic_is_rejected() {
        let cfg = BridgeConfig {
            detection_topic: "/spatial_mesh".to_string(),
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_rate_is_rejected() {
        let cfg = BridgeConfig {
            max_publishes_per_second: Some(0),
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: BridgeConfig =
            serde_json::from_str(r#"{ "mesh_topic": "/hl2/mesh", "rate_window": 30 }"#).unwrap();
        assert_eq!(cfg.mesh_topic, "/hl2/mesh");
        assert_eq!(cfg.rate_window, 30);
        assert_eq!(cfg.detection_topic, "/object_detections_3d");
        assert_eq!(cfg.max_in_flight_publishes, 64);
        assert_eq!(cfg.removed_mesh_memory, 4096);
    }
}
