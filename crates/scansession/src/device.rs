//! Video input enumeration and camera preference.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::media::{FacingMode, MediaDevices};
use scanconf::CameraConfig;

/// A video input as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInputDevice {
    /// Opaque platform identifier.
    pub device_id: String,

    /// Human-readable name. Empty until camera permission has been granted.
    pub label: String,
}

impl VideoInputDevice {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
        }
    }
}

/// What a stream request binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSelector {
    /// A concrete enumerated device.
    Device(String),
    /// No device could be enumerated; let the platform pick by direction.
    FacingMode(FacingMode),
}

impl fmt::Display for CameraSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSelector::Device(id) => write!(f, "device:{}", id),
            CameraSelector::FacingMode(mode) => write!(f, "facing:{}", mode),
        }
    }
}

/// Picks the camera a scan should use.
///
/// Rear cameras are preferred by label. Labels are only populated after the
/// first permission grant, so an unlabeled list falls back to the first
/// device, and an empty list falls back to a facing-mode hint.
#[derive(Debug, Clone)]
pub struct DeviceSelector {
    rear_tokens: Vec<String>,
    fallback: FacingMode,
}

impl DeviceSelector {
    pub fn new<I, S>(rear_tokens: I, fallback: FacingMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rear_tokens: rear_tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            fallback,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        let fallback = match config.fallback_facing_mode.parse::<FacingMode>() {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid fallback facing mode, using environment");
                FacingMode::Environment
            }
        };
        Self::new(&config.rear_label_tokens, fallback)
    }

    pub fn fallback(&self) -> FacingMode {
        self.fallback
    }

    /// Enumerate video inputs. An enumeration failure is logged and treated
    /// as an empty list so the facing-mode fallback still gets a chance.
    pub async fn list_devices(&self, media: &dyn MediaDevices) -> Vec<VideoInputDevice> {
        match media.enumerate_video_inputs().await {
            Ok(devices) => {
                tracing::debug!(count = devices.len(), "Enumerated video inputs");
                devices
            }
            Err(e) => {
                tracing::warn!(error = %e, "Video input enumeration failed");
                Vec::new()
            }
        }
    }

    /// Choose a device id: first rear-labelled device, else the first device.
    pub fn select_preferred(&self, devices: &[VideoInputDevice]) -> Option<String> {
        devices
            .iter()
            .find(|d| self.is_rear(&d.label))
            .or_else(|| devices.first())
            .map(|d| d.device_id.clone())
    }

    /// Resolve what the stream request should bind to.
    pub fn resolve(&self, devices: &[VideoInputDevice]) -> CameraSelector {
        match self.select_preferred(devices) {
            Some(id) => CameraSelector::Device(id),
            None => CameraSelector::FacingMode(self.fallback),
        }
    }

    fn is_rear(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.rear_tokens.iter().any(|t| label.contains(t.as_str()))
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(list: &[(&str, &str)]) -> Vec<VideoInputDevice> {
        list.iter()
            .map(|(id, label)| VideoInputDevice::new(*id, *label))
            .collect()
    }

    #[test]
    fn test_prefers_back_camera() {
        let selector = DeviceSelector::default();
        let list = devices(&[("1", "Front Camera"), ("2", "Back Camera")]);
        assert_eq!(selector.select_preferred(&list), Some("2".to_string()));
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let selector = DeviceSelector::default();
        let list = devices(&[
            ("a", "FaceTime HD"),
            ("b", "camera2 0, facing ENVIRONMENT"),
        ]);
        assert_eq!(selector.select_preferred(&list), Some("b".to_string()));
    }

    #[test]
    fn test_first_rear_match_wins() {
        let selector = DeviceSelector::default();
        let list = devices(&[("1", "Front"), ("2", "Rear Wide"), ("3", "Back Tele")]);
        assert_eq!(selector.select_preferred(&list), Some("2".to_string()));
    }

    #[test]
    fn test_unlabeled_devices_fall_back_to_first() {
        let selector = DeviceSelector::default();
        let list = devices(&[("x", ""), ("y", "")]);
        assert_eq!(selector.select_preferred(&list), Some("x".to_string()));
        assert_eq!(selector.resolve(&list), CameraSelector::Device("x".to_string()));
    }

    #[test]
    fn test_empty_list_resolves_to_facing_mode() {
        let selector = DeviceSelector::default();
        assert_eq!(selector.select_preferred(&[]), None);
        assert_eq!(
            selector.resolve(&[]),
            CameraSelector::FacingMode(FacingMode::Environment)
        );
    }

    #[test]
    fn test_custom_tokens() {
        let selector = DeviceSelector::new(["  Achter "], FacingMode::User);
        let list = devices(&[("1", "Back"), ("2", "achterkant")]);
        assert_eq!(selector.select_preferred(&list), Some("2".to_string()));
        assert_eq!(selector.resolve(&[]), CameraSelector::FacingMode(FacingMode::User));
    }

    #[test]
    fn test_invalid_config_facing_mode_uses_environment() {
        let config = CameraConfig {
            fallback_facing_mode: "upward".to_string(),
            ..CameraConfig::default()
        };
        let selector = DeviceSelector::from_config(&config);
        assert_eq!(selector.fallback(), FacingMode::Environment);
    }
}
