//! Simulated camera backend
//!
//! An in-process stand-in for the platform camera and barcode decoder. It
//! records every acquisition and every track stop so callers can check that
//! the hardware would have been switched off, and it can hold acquisitions
//! open to imitate a permission prompt the user has not answered yet.
//!
//! Used by the test suites and by `scanctl` demo runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

use crate::decode::{DecodeError, FrameDecoder};
use crate::device::VideoInputDevice;
use crate::media::{MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack, RenderSurface};

#[derive(Debug, Default)]
struct Counters {
    enumerations: AtomicUsize,
    requested: AtomicUsize,
    succeeded: AtomicUsize,
    released: AtomicUsize,
    tracks_stopped: AtomicUsize,
    live_streams: AtomicUsize,
}

/// Snapshot of what the simulated camera has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub enumerations: usize,
    pub acquisitions_requested: usize,
    pub acquisitions_succeeded: usize,
    /// Streams whose tracks have all been stopped.
    pub streams_released: usize,
    pub tracks_stopped: usize,
    /// Streams acquired and not yet released (hardware indicator on).
    pub live_streams: usize,
}

#[derive(Debug)]
struct SimTrack {
    id: String,
    stopped: AtomicBool,
    ended: AtomicBool,
    stream_live_tracks: Arc<AtomicUsize>,
    counters: Arc<Counters>,
}

impl MediaTrack for SimTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.counters.tracks_stopped.fetch_add(1, Ordering::SeqCst);
        if self.stream_live_tracks.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
            self.counters.live_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !self.ended.load(Ordering::SeqCst)
    }
}

/// Simulated platform camera.
#[derive(Debug)]
pub struct SimCamera {
    devices: Mutex<Vec<VideoInputDevice>>,
    enumeration_error: Mutex<Option<MediaError>>,
    failures: Mutex<VecDeque<MediaError>>,
    permission_denied: AtomicBool,
    tracks_per_stream: usize,
    hold: AtomicBool,
    gate: Semaphore,
    pending: watch::Sender<usize>,
    constraints: Mutex<Vec<MediaConstraints>>,
    tracks: Mutex<Vec<Arc<SimTrack>>>,
    counters: Arc<Counters>,
    next_stream: AtomicUsize,
}

impl SimCamera {
    /// A phone-like camera pair: "1" front, "2" back.
    pub fn new() -> Self {
        Self::with_devices(vec![
            VideoInputDevice::new("1", "Front Camera"),
            VideoInputDevice::new("2", "Back Camera"),
        ])
    }

    pub fn with_devices(devices: Vec<VideoInputDevice>) -> Self {
        Self::build(devices, 1)
    }

    /// Default devices, each stream carrying `tracks` tracks.
    pub fn with_tracks_per_stream(tracks: usize) -> Self {
        let mut camera = Self::new();
        camera.tracks_per_stream = tracks.max(1);
        camera
    }

    /// Enumeration returns nothing; facing-mode requests still succeed.
    pub fn without_devices() -> Self {
        Self::with_devices(Vec::new())
    }

    fn build(devices: Vec<VideoInputDevice>, tracks_per_stream: usize) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            devices: Mutex::new(devices),
            enumeration_error: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
            permission_denied: AtomicBool::new(false),
            tracks_per_stream,
            hold: AtomicBool::new(false),
            gate: Semaphore::new(0),
            pending,
            constraints: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
            next_stream: AtomicUsize::new(1),
        }
    }

    pub fn set_devices(&self, devices: Vec<VideoInputDevice>) {
        *self.devices.lock().expect("sim devices mutex poisoned") = devices;
    }

    /// Make the next enumerations fail with `err` (None clears it).
    pub fn set_enumeration_error(&self, err: Option<MediaError>) {
        *self.enumeration_error.lock().expect("sim enumeration mutex poisoned") = err;
    }

    /// Fail the next stream request with `err`. Queued failures are used in order.
    pub fn push_acquisition_failure(&self, err: MediaError) {
        self.failures
            .lock()
            .expect("sim failures mutex poisoned")
            .push_back(err);
    }

    /// Answer every stream request as if the user declined the prompt.
    pub fn set_permission_denied(&self, denied: bool) {
        self.permission_denied.store(denied, Ordering::SeqCst);
    }

    /// Hold stream requests open until [`SimCamera::settle_pending`] lets them through.
    pub fn hold_acquisitions(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Let `n` held stream requests complete.
    pub fn settle_pending(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of stream requests currently held open.
    pub fn pending_acquisitions(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until at least `n` stream requests are held open.
    pub async fn wait_until_pending(&self, n: usize) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|pending| *pending >= n).await;
    }

    /// Simulate the camera being unplugged: every live track ends.
    pub fn unplug(&self) {
        let tracks = self.tracks.lock().expect("sim tracks mutex poisoned");
        for track in tracks.iter() {
            track.ended.store(true, Ordering::SeqCst);
        }
    }

    /// Constraints of every stream request, in order.
    pub fn constraints_log(&self) -> Vec<MediaConstraints> {
        self.constraints
            .lock()
            .expect("sim constraints mutex poisoned")
            .clone()
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            enumerations: self.counters.enumerations.load(Ordering::SeqCst),
            acquisitions_requested: self.counters.requested.load(Ordering::SeqCst),
            acquisitions_succeeded: self.counters.succeeded.load(Ordering::SeqCst),
            streams_released: self.counters.released.load(Ordering::SeqCst),
            tracks_stopped: self.counters.tracks_stopped.load(Ordering::SeqCst),
            live_streams: self.counters.live_streams.load(Ordering::SeqCst),
        }
    }

    fn open_stream(&self) -> MediaStream {
        let n = self.next_stream.fetch_add(1, Ordering::SeqCst);
        let stream_id = format!("sim-stream-{}", n);
        let stream_live_tracks = Arc::new(AtomicUsize::new(self.tracks_per_stream));

        let tracks: Vec<Arc<SimTrack>> = (0..self.tracks_per_stream)
            .map(|i| {
                Arc::new(SimTrack {
                    id: format!("{}-track-{}", stream_id, i),
                    stopped: AtomicBool::new(false),
                    ended: AtomicBool::new(false),
                    stream_live_tracks: stream_live_tracks.clone(),
                    counters: self.counters.clone(),
                })
            })
            .collect();

        self.tracks
            .lock()
            .expect("sim tracks mutex poisoned")
            .extend(tracks.iter().cloned());
        self.counters.succeeded.fetch_add(1, Ordering::SeqCst);
        self.counters.live_streams.fetch_add(1, Ordering::SeqCst);

        let tracks = tracks
            .into_iter()
            .map(|t| t as Arc<dyn MediaTrack>)
            .collect();
        MediaStream::new(stream_id, tracks)
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SimCamera {
    async fn enumerate_video_inputs(&self) -> Result<Vec<VideoInputDevice>, MediaError> {
        self.counters.enumerations.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .enumeration_error
            .lock()
            .expect("sim enumeration mutex poisoned")
            .clone()
        {
            return Err(err);
        }
        Ok(self.devices.lock().expect("sim devices mutex poisoned").clone())
    }

    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        self.counters.requested.fetch_add(1, Ordering::SeqCst);
        self.constraints
            .lock()
            .expect("sim constraints mutex poisoned")
            .push(constraints.clone());

        if self.hold.load(Ordering::SeqCst) {
            self.pending.send_modify(|p| *p += 1);
            let permit = self.gate.acquire().await;
            self.pending.send_modify(|p| *p -= 1);
            match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(MediaError::Aborted("simulated camera shut down".into())),
            }
        }

        let scripted = self
            .failures
            .lock()
            .expect("sim failures mutex poisoned")
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(MediaError::NotAllowed("permission dismissed".into()));
        }
        if let Some(id) = &constraints.device_id {
            let known = self
                .devices
                .lock()
                .expect("sim devices mutex poisoned")
                .iter()
                .any(|d| &d.device_id == id);
            if !known {
                return Err(MediaError::NotFound(format!("no device with id {}", id)));
            }
        }

        Ok(self.open_stream())
    }
}

/// Decoder that plays back a script of per-frame outcomes.
///
/// Once the script runs out every further frame yields the `then` outcome.
#[derive(Debug)]
pub struct ScriptedDecoder {
    script: Mutex<VecDeque<Result<String, DecodeError>>>,
    then: Result<String, DecodeError>,
    frames: AtomicUsize,
    latency: Option<Duration>,
}

impl ScriptedDecoder {
    pub fn new(
        script: Vec<Result<String, DecodeError>>,
        then: Result<String, DecodeError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            then,
            frames: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// `misses` empty frames, then `code` on every frame after.
    pub fn code_after(misses: usize, code: impl Into<String>) -> Self {
        Self::new(vec![Err(DecodeError::NoMatch); misses], Ok(code.into()))
    }

    /// Never finds a barcode.
    pub fn never() -> Self {
        Self::new(Vec::new(), Err(DecodeError::NoMatch))
    }

    /// Wait `latency` before each frame's outcome.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn frames_decoded(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameDecoder for ScriptedDecoder {
    async fn decode_frame(&self, stream: &MediaStream) -> Result<String, DecodeError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !stream.is_active() {
            return Err(DecodeError::StreamEnded);
        }
        let next = self
            .script
            .lock()
            .expect("scripted decoder mutex poisoned")
            .pop_front();
        next.unwrap_or_else(|| self.then.clone())
    }
}

/// Render surface that remembers what it shows.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    current: Mutex<Option<String>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the stream currently attached.
    pub fn current(&self) -> Option<String> {
        self.current.lock().expect("surface mutex poisoned").clone()
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl RenderSurface for RecordingSurface {
    fn attach(&self, stream: &MediaStream) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().expect("surface mutex poisoned") = Some(stream.id().to_string());
    }

    fn detach(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().expect("surface mutex poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_device(id: &str) -> MediaConstraints {
        MediaConstraints {
            device_id: Some(id.to_string()),
            ..MediaConstraints::default()
        }
    }

    #[tokio::test]
    async fn test_stats_track_acquire_and_release() {
        let camera = SimCamera::with_tracks_per_stream(2);
        let stream = camera.get_user_media(by_device("2")).await.unwrap();
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(camera.stats().live_streams, 1);

        stream.tracks()[0].stop();
        assert_eq!(camera.stats().streams_released, 0);
        stream.tracks()[1].stop();
        stream.tracks()[1].stop();

        let stats = camera.stats();
        assert_eq!(stats.streams_released, 1);
        assert_eq!(stats.tracks_stopped, 2);
        assert_eq!(stats.live_streams, 0);
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let camera = SimCamera::new();
        let err = camera.get_user_media(by_device("9")).await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));
        assert_eq!(camera.stats().acquisitions_succeeded, 0);
    }

    #[tokio::test]
    async fn test_held_acquisition_waits_for_settle() {
        let camera = Arc::new(SimCamera::new());
        camera.hold_acquisitions(true);

        let pending = {
            let camera = camera.clone();
            tokio::spawn(async move { camera.get_user_media(by_device("1")).await })
        };

        camera.wait_until_pending(1).await;
        assert_eq!(camera.pending_acquisitions(), 1);
        assert_eq!(camera.stats().acquisitions_succeeded, 0);

        camera.settle_pending(1);
        let stream = pending.await.unwrap().unwrap();
        assert!(stream.is_active());
        assert_eq!(camera.pending_acquisitions(), 0);
    }

    #[tokio::test]
    async fn test_unplug_ends_tracks_without_releasing() {
        let camera = SimCamera::new();
        let stream = camera.get_user_media(by_device("1")).await.unwrap();
        camera.unplug();
        assert!(!stream.is_active());
        assert_eq!(camera.stats().live_streams, 1);

        stream.stop_all_tracks();
        assert_eq!(camera.stats().streams_released, 1);
    }

    #[tokio::test]
    async fn test_scripted_decoder_plays_script_then_repeats() {
        let camera = SimCamera::new();
        let stream = camera.get_user_media(by_device("1")).await.unwrap();
        let decoder = ScriptedDecoder::new(
            vec![Err(DecodeError::Fault("glitch".into()))],
            Ok("FA001".to_string()),
        );

        assert_eq!(
            decoder.decode_frame(&stream).await,
            Err(DecodeError::Fault("glitch".into()))
        );
        assert_eq!(decoder.decode_frame(&stream).await, Ok("FA001".to_string()));
        assert_eq!(decoder.decode_frame(&stream).await, Ok("FA001".to_string()));
        assert_eq!(decoder.frames_decoded(), 3);
    }
}
