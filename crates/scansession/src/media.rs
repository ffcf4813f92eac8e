//! Camera media collaborators
//!
//! The platform camera API is consumed through these traits: device
//! enumeration, permission-gated stream acquisition, per-track control, and
//! the render surface a live stream is shown on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::device::VideoInputDevice;

/// Logical camera direction hint used when no concrete device is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Front camera, facing the user.
    User,
    /// Rear camera, facing away from the user.
    Environment,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a facing mode name.
#[derive(Debug, Clone, Error)]
#[error("unknown facing mode: {0} (expected \"user\" or \"environment\")")]
pub struct UnknownFacingMode(pub String);

impl FromStr for FacingMode {
    type Err = UnknownFacingMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(FacingMode::User),
            "environment" => Ok(FacingMode::Environment),
            _ => Err(UnknownFacingMode(s.to_string())),
        }
    }
}

/// Constraints passed to [`MediaDevices::get_user_media`].
///
/// Exactly one of `device_id` or `facing_mode` is set by the stream
/// controller. The resolution is a preference, not a requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaConstraints {
    pub device_id: Option<String>,
    pub facing_mode: Option<FacingMode>,
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
}

/// Failure reported by the platform camera API.
///
/// Variants mirror the failure names a media stack reports for a denied or
/// impossible camera request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The user declined the permission prompt, or policy blocks the camera.
    #[error("camera permission not allowed: {0}")]
    NotAllowed(String),

    /// Insecure context or similar platform-level refusal.
    #[error("camera access refused for security reasons: {0}")]
    Security(String),

    /// No device matches the request.
    #[error("no matching camera found: {0}")]
    NotFound(String),

    /// The device exists but could not be opened (busy, removed, hardware error).
    #[error("camera could not be read: {0}")]
    NotReadable(String),

    /// The request asked for something no device can provide.
    #[error("camera constraint cannot be satisfied: {constraint}")]
    Overconstrained { constraint: String },

    /// The platform aborted the request.
    #[error("camera request aborted: {0}")]
    Aborted(String),

    #[error("camera error: {0}")]
    Other(String),
}

/// One media track of a live stream.
///
/// Stopping a track turns off the hardware it drives; stopping an already
/// stopped track does nothing.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn stop(&self);

    /// True while the track is still delivering frames.
    fn is_live(&self) -> bool;
}

/// A live camera stream and the tracks it owns.
///
/// Clones share the same tracks, so stopping through any clone stops the
/// hardware. Only the stream controller stops streams.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// True if any track is still live.
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// Stop every track. Returns how many were live before the call.
    pub fn stop_all_tracks(&self) -> usize {
        let mut stopped = 0;
        for track in &self.tracks {
            if track.is_live() {
                stopped += 1;
            }
            track.stop();
        }
        stopped
    }
}

/// Platform camera API.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List the video inputs currently known to the platform.
    ///
    /// Labels may be empty until camera permission has been granted once.
    async fn enumerate_video_inputs(&self) -> Result<Vec<VideoInputDevice>, MediaError>;

    /// Request a camera stream. May wait indefinitely on a permission prompt.
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;
}

/// Visual target a live stream is rendered into.
///
/// Called with the session lock held; implementations must not call back into
/// the session.
pub trait RenderSurface: Send + Sync {
    fn attach(&self, stream: &MediaStream);

    fn detach(&self);
}

/// Render surface that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn attach(&self, _stream: &MediaStream) {}

    fn detach(&self) {}
}
