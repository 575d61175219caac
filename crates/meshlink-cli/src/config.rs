//! Configuration vault – reads/writes `~/.meshlink/config.toml`.

use meshlink_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted host configuration stored in `~/.meshlink/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port of the rosbridge-style WebSocket endpoint.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Overlay frame cadence.
    #[serde(default = "default_frame_rate_hz")]
    pub frame_rate_hz: f64,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

fn default_ws_port() -> u16 {
    9090
}
fn default_frame_rate_hz() -> f64 {
    60.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: default_ws_port(),
            frame_rate_hz: default_frame_rate_hz(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.frame_period()?;
        self.bridge.validate().map_err(|e| e.to_string())
    }

    /// Interval between overlay frames.
    ///
    /// Fails unless the period is at least one nanosecond and fits in a
    /// [`Duration`].
    pub fn frame_period(&self) -> Result<Duration, String> {
        let hz = self.frame_rate_hz;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(format!("frame_rate_hz must be a positive number, got {hz}"));
        }
        match Duration::try_from_secs_f64(1.0 / hz) {
            Ok(period) if !period.is_zero() => Ok(period),
            _ => Err(format!("frame_rate_hz {hz} gives no usable frame period")),
        }
    }
}

/// Return the path to `~/.meshlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".meshlink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path, applying env overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MESHLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MESHLINK_WS_PORT` | `ws_port` |
/// | `MESHLINK_FRAME_RATE_HZ` | `frame_rate_hz` |
/// | `MESHLINK_MESH_TOPIC` | `bridge.mesh_topic` |
/// | `MESHLINK_DETECTION_TOPIC` | `bridge.detection_topic` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MESHLINK_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.ws_port = port;
    }
    if let Ok(v) = std::env::var("MESHLINK_FRAME_RATE_HZ")
        && let Ok(hz) = v.parse::<f64>()
    {
        cfg.frame_rate_hz = hz;
    }
    if let Ok(v) = std::env::var("MESHLINK_MESH_TOPIC") {
        cfg.bridge.mesh_topic = v;
    }
    if let Ok(v) = std::env::var("MESHLINK_DETECTION_TOPIC") {
        cfg.bridge.detection_topic = v;
    }
}

/// Save the config to disk, creating `~/.meshlink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.ws_port, 9090);
        assert_eq!(loaded.bridge.mesh_topic, "/spatial_mesh");
        assert_eq!(loaded.bridge.detection_topic, "/object_detections_3d");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "frame_rate_hz = 30.0\n\n[bridge]\nmax_in_flight_publishes = 8\n",
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.frame_rate_hz, 30.0);
        assert_eq!(cfg.ws_port, 9090);
        assert_eq!(cfg.bridge.max_in_flight_publishes, 8);
        assert_eq!(cfg.bridge.rate_window, 10);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ws_port = \"not a number\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_meshlink_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".meshlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn validate_rejects_non_positive_frame_rate() {
        let cfg = Config {
            frame_rate_hz: 0.0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn frame_period_rejects_rates_without_a_usable_period() {
        let too_fast = Config {
            frame_rate_hz: 1e12,
            ..Config::default()
        };
        assert!(too_fast.frame_period().is_err());
        assert!(too_fast.validate().is_err());

        let too_slow = Config {
            frame_rate_hz: 1e-300,
            ..Config::default()
        };
        assert!(too_slow.validate().is_err());

        let period = Config::default().frame_period().expect("60 Hz is valid");
        assert_eq!(period, Duration::from_secs_f64(1.0 / 60.0));
    }

    #[test]
    fn apply_env_overrides_changes_ws_port() {
        // SAFETY: no other test reads or writes this env-var.
        unsafe { std::env::set_var("MESHLINK_WS_PORT", "9999") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ws_port, 9999);
        unsafe { std::env::remove_var("MESHLINK_WS_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_frame_rate() {
        // SAFETY: no other test reads or writes this env-var.
        unsafe { std::env::set_var("MESHLINK_FRAME_RATE_HZ", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.frame_rate_hz, 60.0);
        unsafe { std::env::remove_var("MESHLINK_FRAME_RATE_HZ") };
    }

    #[test]
    fn apply_env_overrides_changes_detection_topic() {
        // SAFETY: no other test reads or writes this env-var.
        unsafe { std::env::set_var("MESHLINK_DETECTION_TOPIC", "/hl2/detections") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge.detection_topic, "/hl2/detections");
        unsafe { std::env::remove_var("MESHLINK_DETECTION_TOPIC") };
    }
}
