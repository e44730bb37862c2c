//! ATL configuration
//!
//! Loaded from JSON; every field is optional and falls back to [`AtlConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AtlError, AtlResult};
use crate::propagation::PropagationSettings;

/// Default file cache budget (384 MiB)
pub const DEFAULT_FILE_CACHE_BYTES: usize = 384 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlConfig {
    /// Free audio objects kept around for reuse
    pub object_pool_size: usize,
    /// Free events kept around for reuse
    pub event_pool_size: usize,
    /// Listeners that can be reserved besides the default one
    pub num_reserved_listeners: usize,
    /// File cache budget in bytes
    pub file_cache_max_bytes: usize,
    /// Objects farther than this from the listener issue no rays
    pub occlusion_max_distance: f32,
    /// Distance below which the direct ray's obstruction applies fully
    pub full_obstruction_max_distance: f32,
    /// Speed delta (units/s) that triggers an object_speed update
    pub velocity_tracking_threshold: f32,
    /// Interval between velocity updates
    pub velocity_update_interval_ms: f32,
    /// Do not react to window focus changes
    pub ignore_window_focus: bool,
    /// Active localization language
    pub language: String,
    /// Platform name used to select preload config groups
    pub platform: String,
    /// Capacity of the request ring buffer
    pub request_queue_capacity: usize,
    /// Seed for obstruction ray jitter (random when unset)
    pub ray_seed: Option<u64>,
}

impl Default for AtlConfig {
    fn default() -> Self {
        Self {
            object_pool_size: 512,
            event_pool_size: 512,
            num_reserved_listeners: 8,
            file_cache_max_bytes: DEFAULT_FILE_CACHE_BYTES,
            occlusion_max_distance: 500.0,
            full_obstruction_max_distance: 5.0,
            velocity_tracking_threshold: 0.1,
            velocity_update_interval_ms: 100.0,
            ignore_window_focus: false,
            language: "english".to_string(),
            platform: std::env::consts::OS.to_string(),
            request_queue_capacity: 4096,
            ray_seed: None,
        }
    }
}

impl AtlConfig {
    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> AtlResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> AtlResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Obstruction tuning handed to every audio object
    pub fn propagation_settings(&self) -> PropagationSettings {
        PropagationSettings {
            full_obstruction_max_distance: self.full_obstruction_max_distance,
            occlusion_max_distance: self.occlusion_max_distance,
            ray_seed: self.ray_seed,
        }
    }

    pub fn to_json(&self) -> AtlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> AtlResult<()> {
        if self.object_pool_size == 0 {
            return Err(AtlError::InvalidConfig(
                "object_pool_size must be non-zero".into(),
            ));
        }
        if self.event_pool_size == 0 {
            return Err(AtlError::InvalidConfig(
                "event_pool_size must be non-zero".into(),
            ));
        }
        if self.request_queue_capacity == 0 {
            return Err(AtlError::InvalidConfig(
                "request_queue_capacity must be non-zero".into(),
            ));
        }
        if self.occlusion_max_distance <= 0.0 || self.full_obstruction_max_distance <= 0.0 {
            return Err(AtlError::InvalidConfig(format!(
                "obstruction distances must be positive (occlusion {}, full obstruction {})",
                self.occlusion_max_distance, self.full_obstruction_max_distance
            )));
        }
        if self.velocity_update_interval_ms <= 0.0 {
            return Err(AtlError::InvalidConfig(
                "velocity_update_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(AtlConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AtlConfig::from_json(r#"{ "object_pool_size": 16, "language": "german" }"#)
            .unwrap();
        assert_eq!(config.object_pool_size, 16);
        assert_eq!(config.language, "german");
        assert_eq!(config.event_pool_size, 512);
        assert!(config.ray_seed.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = AtlConfig::from_json(r#"{ "event_pool_size": 0 }"#).unwrap_err();
        assert!(matches!(err, AtlError::InvalidConfig(_)));

        let err = AtlConfig::from_json(r#"{ "occlusion_max_distance": -1.0 }"#).unwrap_err();
        assert!(matches!(err, AtlError::InvalidConfig(_)));

        let err = AtlConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, AtlError::JsonError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atl.json");
        let config = AtlConfig {
            file_cache_max_bytes: 1024,
            ray_seed: Some(7),
            ..Default::default()
        };
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        let loaded = AtlConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
