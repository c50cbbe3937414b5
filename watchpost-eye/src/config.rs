//! Configuration for watchpost-eye

use crate::error::VisionError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for capture, post-processing and the scenario pipeline.
///
/// Read from the `eye` block of the service config; every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    /// Wall-clock budget for one capture call
    pub capture_timeout_ms: u64,
    /// Slack added to the capture budget before the source is abandoned
    pub timeout_grace_ms: u64,
    /// Bytes requested from the stream source per read
    pub read_chunk_size: usize,
    pub nms_iou_threshold: f32,
    /// Maximum detections kept per frame after NMS
    pub top_k: usize,
    /// Detector input (width, height) when the model does not declare one
    pub yolo_input: (u32, u32),
    /// Classifier input (width, height)
    pub cnn_input: (u32, u32),
    /// Use the deterministic fingerprint detector instead of loading weights
    pub offline_detector: bool,
    /// Write captured frames under the service capture directory
    pub persist_frames: bool,
    pub monitor_interval_ms: u64,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 5000,
            timeout_grace_ms: 200,
            read_chunk_size: 4096,
            nms_iou_threshold: 0.45,
            top_k: 300,
            yolo_input: (640, 640),
            cnn_input: (128, 128),
            offline_detector: false,
            persist_frames: false,
            monitor_interval_ms: 1000,
        }
    }
}

impl EyeConfig {
    /// Reads the `eye` block; a missing block yields the defaults.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, VisionError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let config: EyeConfig = serde_json::from_value(value.clone())
            .map_err(|e| VisionError::Config(format!("invalid eye config: {}", e)))?;
        config.validate().map_err(VisionError::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.capture_timeout_ms == 0 {
            return Err("Capture timeout must be positive".to_string());
        }
        if self.read_chunk_size == 0 || self.read_chunk_size > 1 << 20 {
            return Err("Read chunk size must be between 1 byte and 1 MiB".to_string());
        }
        if !(0.0..=1.0).contains(&self.nms_iou_threshold) {
            return Err("NMS IoU threshold must be in [0, 1]".to_string());
        }
        if self.top_k == 0 {
            return Err("top_k must be at least 1".to_string());
        }
        for (name, (w, h)) in [("yolo_input", self.yolo_input), ("cnn_input", self.cnn_input)] {
            if w == 0 || h == 0 {
                return Err(format!("{} must be non-zero", name));
            }
            if w > 4096 || h > 4096 {
                return Err(format!("{} too large (max 4096)", name));
            }
        }
        if self.monitor_interval_ms == 0 {
            return Err("Monitor interval must be positive".to_string());
        }
        Ok(())
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn timeout_grace(&self) -> Duration {
        Duration::from_millis(self.timeout_grace_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_default() {
        let config = EyeConfig::default();
        assert_eq!(config.capture_timeout(), Duration::from_millis(5000));
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.top_k, 300);
        assert!(!config.offline_detector);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_null_uses_defaults() {
        assert_eq!(EyeConfig::from_value(&serde_json::Value::Null).unwrap(), EyeConfig::default());
    }

    #[test]
    fn test_partial_block_keeps_other_defaults() {
        let config = EyeConfig::from_value(&json!({"capture_timeout_ms": 3000, "offline_detector": true})).unwrap();
        assert_eq!(config.capture_timeout_ms, 3000);
        assert!(config.offline_detector);
        assert_eq!(config.nms_iou_threshold, 0.45);
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        let mut config = EyeConfig::default();
        config.nms_iou_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = EyeConfig::default();
        config.read_chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = EyeConfig::default();
        config.yolo_input = (0, 640);
        assert!(config.validate().is_err());

        let mut config = EyeConfig::default();
        config.cnn_input = (128, 5000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_block_is_config_error() {
        let result = EyeConfig::from_value(&json!({"top_k": 0}));
        assert!(matches!(result, Err(VisionError::Config(_))));
        let result = EyeConfig::from_value(&json!({"top_k": "many"}));
        assert!(matches!(result, Err(VisionError::Config(_))));
    }
}
