//! Session configuration.
//!
//! [`Config`] holds the connect-time capabilities; changing any of its
//! fields requires a reconnect. [`RuntimeConfig`] is the subset that can be
//! applied to a live session. Both load from TOML, where any missing field
//! falls back to its default.

use crate::types::AreaDescription;
use crate::{Result, TangoError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connect-time configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enable_auto_recovery: bool,
    pub use_cloud_adf: bool,
    /// Whether the color camera may be used at all this connection.
    /// [`RuntimeConfig::enable_color_camera`] toggles it within that.
    pub enable_color_camera: bool,
    pub color_mode_auto: bool,
    pub enable_depth: bool,
    pub high_rate_pose: bool,
    pub enable_learning_mode: bool,
    pub enable_drift_correction: bool,
    pub low_latency_imu_integration: bool,
    pub enable_motion_tracking: bool,
    pub smooth_pose: bool,
    pub color_exposure: i32,
    pub color_iso: i32,
    /// Area description to localize against, if any.
    pub area_description: Option<AreaDescription>,
    /// Engine world units per meter.
    pub meters_to_world_scale: f64,
    pub max_point_cloud_elements: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_auto_recovery: true,
            use_cloud_adf: false,
            enable_color_camera: true,
            color_mode_auto: true,
            enable_depth: false,
            high_rate_pose: false,
            enable_learning_mode: false,
            enable_drift_correction: false,
            low_latency_imu_integration: true,
            enable_motion_tracking: true,
            smooth_pose: true,
            color_exposure: 0,
            color_iso: 100,
            area_description: None,
            meters_to_world_scale: 100.0,
            max_point_cloud_elements: 60_000,
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `TANGO_*` environment overrides on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        self.enable_color_camera = read_env_bool("TANGO_ENABLE_COLOR_CAMERA", self.enable_color_camera);
        self.enable_depth = read_env_bool("TANGO_ENABLE_DEPTH", self.enable_depth);
        self.enable_learning_mode = read_env_bool("TANGO_ENABLE_LEARNING_MODE", self.enable_learning_mode);
        self.enable_drift_correction =
            read_env_bool("TANGO_ENABLE_DRIFT_CORRECTION", self.enable_drift_correction);
        self.enable_motion_tracking =
            read_env_bool("TANGO_ENABLE_MOTION_TRACKING", self.enable_motion_tracking);
        self.meters_to_world_scale = read_env_f64("TANGO_METERS_TO_WORLD", self.meters_to_world_scale);
        self.max_point_cloud_elements =
            read_env_u32("TANGO_MAX_POINT_CLOUD_ELEMENTS", self.max_point_cloud_elements);
        if let Some(uuid) = read_env_string("TANGO_AREA_DESCRIPTION") {
            self.area_description = Some(AreaDescription::new(uuid, String::new()));
        }
        self
    }

    /// Reject configurations the service would fail on.
    pub fn validate(&self) -> Result<()> {
        if !self.meters_to_world_scale.is_finite() || self.meters_to_world_scale <= 0.0 {
            return Err(TangoError::Configuration(format!(
                "meters_to_world_scale must be positive, got {}",
                self.meters_to_world_scale
            )));
        }
        if self.enable_depth && self.max_point_cloud_elements == 0 {
            return Err(TangoError::Configuration(
                "depth enabled with max_point_cloud_elements = 0".into(),
            ));
        }
        if let Some(adf) = &self.area_description {
            if adf.uuid.trim().is_empty() {
                return Err(TangoError::Configuration(
                    "selected area description has an empty UUID".into(),
                ));
            }
        }
        Ok(())
    }

    /// Whether switching from `self` to `other` needs a full reconnect.
    pub fn requires_reconnect(&self, other: &Config) -> bool {
        self != other
    }

    /// Whether an area description is selected for localization.
    pub fn uses_area_description(&self) -> bool {
        self.area_description.is_some()
    }
}

/// Configuration that can change while connected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub enable_color_camera: bool,
    pub enable_depth: bool,
    /// Depth frames per second; 0 pauses depth without disconnecting it.
    pub depth_framerate: u32,
}

impl RuntimeConfig {
    /// These settings limited to what `config` allows on this connection.
    pub fn limited_by(&self, config: &Config) -> RuntimeConfig {
        RuntimeConfig {
            enable_color_camera: self.enable_color_camera && config.enable_color_camera,
            enable_depth: self.enable_depth && config.enable_depth,
            ..*self
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enable_color_camera: true,
            enable_depth: false,
            depth_framerate: 5,
        }
    }
}

/// Both configuration structures, as stored in one file.
///
/// ```toml
/// [config]
/// enable_depth = true
/// meters_to_world_scale = 100.0
///
/// [runtime]
/// enable_depth = true
/// depth_framerate = 5
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub config: Config,
    pub runtime: RuntimeConfig,
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn read_env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg = Config::from_toml_str("enable_depth = true\nmax_point_cloud_elements = 100\n").unwrap();
        assert!(cfg.enable_depth);
        assert_eq!(cfg.max_point_cloud_elements, 100);
        assert_eq!(cfg.meters_to_world_scale, 100.0);
        assert!(cfg.enable_motion_tracking);
    }

    #[test]
    fn test_validate_rejects_bad_scale() {
        let cfg = Config {
            meters_to_world_scale: 0.0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(TangoError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_depth_without_capacity() {
        let cfg = Config {
            enable_depth: true,
            max_point_cloud_elements: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_adf_uuid() {
        let cfg = Config {
            area_description: Some(AreaDescription::new("  ", "office.adf")),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_requires_reconnect() {
        let a = Config::default();
        let mut b = a.clone();
        assert!(!a.requires_reconnect(&b));
        b.enable_learning_mode = true;
        assert!(a.requires_reconnect(&b));
    }

    #[test]
    fn test_runtime_limited_by_connect_config() {
        let config = Config {
            enable_color_camera: false,
            ..Config::default()
        };
        let runtime = RuntimeConfig::default();
        let limited = runtime.limited_by(&config);
        assert!(!limited.enable_color_camera);
        assert_eq!(limited.depth_framerate, runtime.depth_framerate);
        assert_eq!(runtime.limited_by(&Config::default()), runtime);
    }

    #[test]
    fn test_session_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[config]\nenable_learning_mode = true\n\n[config.area_description]\nuuid = \"abc\"\nfilename = \"office\"\n\n[runtime]\ndepth_framerate = 0\n"
        )
        .unwrap();
        let sc = SessionConfig::load(file.path()).unwrap();
        assert!(sc.config.enable_learning_mode);
        assert_eq!(sc.config.area_description.unwrap().uuid, "abc");
        assert_eq!(sc.runtime.depth_framerate, 0);
        assert!(sc.runtime.enable_color_camera);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = Config::from_toml_str("enable_depth = \"maybe\"").unwrap_err();
        assert!(matches!(err, TangoError::ConfigParse(_)));
    }
}
