//! Camera stream lifecycle
//!
//! The stream controller is the only code that starts or stops camera
//! hardware. Acquisition goes through [`MediaDevices`], release stops every
//! track individually; dropping the handle alone would leave the camera on.

use std::sync::Arc;

use crate::device::CameraSelector;
use crate::error::ScanError;
use crate::media::{MediaConstraints, MediaDevices, MediaStream, RenderSurface};
use scanconf::CameraConfig;

pub struct StreamController {
    media: Arc<dyn MediaDevices>,
    surface: Arc<dyn RenderSurface>,
    ideal_width: Option<u32>,
    ideal_height: Option<u32>,
}

impl StreamController {
    pub fn new(media: Arc<dyn MediaDevices>, surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            media,
            surface,
            ideal_width: None,
            ideal_height: None,
        }
    }

    pub fn from_config(
        config: &CameraConfig,
        media: Arc<dyn MediaDevices>,
        surface: Arc<dyn RenderSurface>,
    ) -> Self {
        Self::new(media, surface).with_ideal_resolution(config.ideal_width, config.ideal_height)
    }

    pub fn with_ideal_resolution(mut self, width: u32, height: u32) -> Self {
        self.ideal_width = Some(width);
        self.ideal_height = Some(height);
        self
    }

    pub fn media(&self) -> &Arc<dyn MediaDevices> {
        &self.media
    }

    pub fn constraints_for(&self, selector: &CameraSelector) -> MediaConstraints {
        let (device_id, facing_mode) = match selector {
            CameraSelector::Device(id) => (Some(id.clone()), None),
            CameraSelector::FacingMode(mode) => (None, Some(*mode)),
        };
        MediaConstraints {
            device_id,
            facing_mode,
            ideal_width: self.ideal_width,
            ideal_height: self.ideal_height,
        }
    }

    /// Request a stream for `selector`.
    ///
    /// Waits as long as the platform does; there is no timeout because a
    /// permission prompt can stay open indefinitely.
    pub async fn acquire(&self, selector: &CameraSelector) -> Result<MediaStream, ScanError> {
        let constraints = self.constraints_for(selector);
        tracing::debug!(camera = %selector, "Requesting camera stream");

        match self.media.get_user_media(constraints).await {
            Ok(stream) => {
                tracing::info!(
                    camera = %selector,
                    stream_id = %stream.id(),
                    tracks = stream.tracks().len(),
                    "Camera stream acquired"
                );
                Ok(stream)
            }
            Err(e) => {
                let err = ScanError::from_media(&e, selector);
                tracing::warn!(
                    camera = %selector,
                    kind = %err.kind,
                    error = %e,
                    "Camera stream request failed"
                );
                Err(err)
            }
        }
    }

    /// Show a live stream on the render surface.
    pub fn bind(&self, stream: &MediaStream) {
        self.surface.attach(stream);
        tracing::debug!(stream_id = %stream.id(), "Stream bound to render surface");
    }

    /// Release the bound stream held in `slot`, if any.
    ///
    /// Detaches the render surface, stops every track and clears the slot.
    /// Returns false when there was nothing to release.
    pub fn release(&self, slot: &mut Option<MediaStream>) -> bool {
        let Some(stream) = slot.take() else {
            return false;
        };
        self.surface.detach();
        let stopped = stream.stop_all_tracks();
        tracing::info!(stream_id = %stream.id(), tracks_stopped = stopped, "Camera stream released");
        true
    }

    /// Stop a stream that was never bound, such as one whose acquisition
    /// settled after its attempt had already been stopped.
    pub fn discard(&self, stream: MediaStream) {
        let stopped = stream.stop_all_tracks();
        tracing::info!(
            stream_id = %stream.id(),
            tracks_stopped = stopped,
            "Discarded camera stream acquired after stop"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanErrorKind;
    use crate::media::{FacingMode, MediaError};
    use crate::sim::{RecordingSurface, SimCamera};

    fn controller(camera: &Arc<SimCamera>, surface: &Arc<RecordingSurface>) -> StreamController {
        StreamController::new(camera.clone(), surface.clone()).with_ideal_resolution(1280, 720)
    }

    #[test]
    fn test_constraints_for_device() {
        let camera = Arc::new(SimCamera::new());
        let surface = Arc::new(RecordingSurface::new());
        let c = controller(&camera, &surface).constraints_for(&CameraSelector::Device("2".into()));
        assert_eq!(c.device_id.as_deref(), Some("2"));
        assert_eq!(c.facing_mode, None);
        assert_eq!(c.ideal_width, Some(1280));
        assert_eq!(c.ideal_height, Some(720));
    }

    #[test]
    fn test_constraints_for_facing_mode() {
        let camera = Arc::new(SimCamera::new());
        let surface = Arc::new(RecordingSurface::new());
        let c = controller(&camera, &surface)
            .constraints_for(&CameraSelector::FacingMode(FacingMode::Environment));
        assert_eq!(c.device_id, None);
        assert_eq!(c.facing_mode, Some(FacingMode::Environment));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let camera = Arc::new(SimCamera::with_tracks_per_stream(2));
        let surface = Arc::new(RecordingSurface::new());
        let streams = controller(&camera, &surface);

        let stream = streams.acquire(&CameraSelector::Device("1".into())).await.unwrap();
        streams.bind(&stream);
        assert_eq!(camera.stats().live_streams, 1);

        let mut slot = Some(stream);
        assert!(streams.release(&mut slot));
        assert!(slot.is_none());
        assert!(!streams.release(&mut slot));

        let stats = camera.stats();
        assert_eq!(stats.live_streams, 0);
        assert_eq!(stats.streams_released, 1);
        assert_eq!(stats.tracks_stopped, 2);
        assert_eq!(surface.detach_count(), 1);
        assert_eq!(surface.current(), None);
    }

    #[tokio::test]
    async fn test_acquire_failure_is_classified() {
        let camera = Arc::new(SimCamera::new());
        camera.push_acquisition_failure(MediaError::NotAllowed("dismissed".into()));
        let surface = Arc::new(RecordingSurface::new());

        let err = controller(&camera, &surface)
            .acquire(&CameraSelector::Device("1".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::PermissionDenied);
        assert_eq!(camera.stats().acquisitions_succeeded, 0);
    }

    #[tokio::test]
    async fn test_discard_does_not_touch_surface() {
        let camera = Arc::new(SimCamera::new());
        let surface = Arc::new(RecordingSurface::new());
        let streams = controller(&camera, &surface);

        let stream = streams.acquire(&CameraSelector::Device("1".into())).await.unwrap();
        streams.discard(stream);

        assert_eq!(camera.stats().streams_released, 1);
        assert_eq!(surface.detach_count(), 0);
    }
}
