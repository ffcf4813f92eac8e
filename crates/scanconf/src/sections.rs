//! Configuration sections - camera selection, decode pacing, telemetry.

use serde::{Deserialize, Serialize};

/// Camera selection and acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Label substrings (case-insensitive) that identify a rear-facing camera.
    /// Default: ["back", "rear", "environment"]
    #[serde(default = "CameraConfig::default_rear_label_tokens")]
    pub rear_label_tokens: Vec<String>,

    /// Facing-mode hint used when no device can be enumerated.
    /// Default: environment
    #[serde(default = "CameraConfig::default_fallback_facing_mode")]
    pub fallback_facing_mode: String,

    /// Ideal capture width in pixels.
    /// Default: 1280
    #[serde(default = "CameraConfig::default_ideal_width")]
    pub ideal_width: u32,

    /// Ideal capture height in pixels.
    /// Default: 720
    #[serde(default = "CameraConfig::default_ideal_height")]
    pub ideal_height: u32,
}

impl CameraConfig {
    fn default_rear_label_tokens() -> Vec<String> {
        vec!["back".to_string(), "rear".to_string(), "environment".to_string()]
    }

    fn default_fallback_facing_mode() -> String {
        "environment".to_string()
    }

    fn default_ideal_width() -> u32 {
        1280
    }

    fn default_ideal_height() -> u32 {
        720
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            rear_label_tokens: Self::default_rear_label_tokens(),
            fallback_facing_mode: Self::default_fallback_facing_mode(),
            ideal_width: Self::default_ideal_width(),
            ideal_height: Self::default_ideal_height(),
        }
    }
}

/// Decode loop pacing and fault tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Delay between frame decode attempts in milliseconds.
    /// Default: 500
    #[serde(default = "DecodeConfig::default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Consecutive decoder faults tolerated before the attempt is aborted.
    /// 1 aborts on the first fault.
    /// Default: 3
    #[serde(default = "DecodeConfig::default_max_consecutive_faults")]
    pub max_consecutive_faults: u32,
}

impl DecodeConfig {
    fn default_scan_interval_ms() -> u64 {
        500
    }

    fn default_max_consecutive_faults() -> u32 {
        3
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: Self::default_scan_interval_ms(),
            max_consecutive_faults: Self::default_max_consecutive_faults(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
