//! Scan session state machine
//!
//! One [`ScanSession`] per scanning surface. Each `start()` opens an attempt
//! that selects a camera, acquires a stream, runs the decode loop and ends in
//! exactly one of Matched, Stopped or Error. The camera is always released
//! before the terminal state is published or any callback fires.
//!
//! Session state sits behind a single mutex that is never held across an
//! `.await`. Every attempt carries a generation number and a cancellation
//! token; work resuming after a suspension point (enumeration, acquisition,
//! a decoded frame) first checks that its attempt is still the current one.
//! An acquisition that settles after its attempt was stopped releases its
//! stream on the spot and never reaches Scanning.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::decode::{DecodeError, DecodeEvent, DecodeLoop, DecodedResult, FrameDecoder};
use crate::device::{CameraSelector, DeviceSelector};
use crate::error::{ScanError, ScanErrorKind};
use crate::media::{MediaDevices, MediaStream, RenderSurface};
use crate::stream::StreamController;
use scanconf::ScanConfig;

/// Lifecycle state of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Acquiring,
    Scanning,
    Matched,
    Stopped,
    Error,
}

impl ScanState {
    /// Acquiring or Scanning: an attempt holds (or is waiting for) the camera.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanState::Acquiring | ScanState::Scanning)
    }

    /// Matched, Stopped or Error: the attempt is over and the camera is off.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Matched | ScanState::Stopped | ScanState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Acquiring => "acquiring",
            ScanState::Scanning => "scanning",
            ScanState::Matched => "matched",
            ScanState::Stopped => "stopped",
            ScanState::Error => "error",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the outcome of scan attempts.
///
/// Callbacks run outside the session lock, after the camera has been released.
pub trait ScanObserver: Send + Sync {
    /// The attempt matched a barcode. Fires at most once per attempt.
    fn on_match(&self, result: &DecodedResult);

    /// The attempt failed.
    fn on_error(&self, error: &ScanError);

    /// A frame could not be decoded. Informational only.
    fn on_diagnostic(&self, _error: &DecodeError) {}
}

/// Observer that ignores everything; use [`ScanSession::subscribe`] instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {
    fn on_match(&self, _result: &DecodedResult) {}

    fn on_error(&self, _error: &ScanError) {}
}

/// Pacing and fault tolerance of the decode phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub scan_interval: Duration,
    pub max_consecutive_faults: u32,
}

impl SessionSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            scan_interval: Duration::from_millis(config.decode.scan_interval_ms.max(1)),
            max_consecutive_faults: config.decode.max_consecutive_faults.max(1),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

/// Resources of the current attempt. Replaced wholesale on every new start.
struct Attempt {
    generation: u64,
    cancel: CancellationToken,
    stream: Option<MediaStream>,
    decode_loop: Option<DecodeLoop>,
    consecutive_faults: u32,
}

impl Attempt {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            cancel: CancellationToken::new(),
            stream: None,
            decode_loop: None,
            consecutive_faults: 0,
        }
    }
}

struct Inner {
    state: ScanState,
    generation: u64,
    attempt: Option<Attempt>,
    selected: Option<CameraSelector>,
    last_error: Option<ScanError>,
    result: Option<DecodedResult>,
}

impl Inner {
    /// The attempt with `generation`, if it is still the live one.
    fn current(&mut self, generation: u64) -> Option<&mut Attempt> {
        if !self.state.is_active() {
            return None;
        }
        self.attempt
            .as_mut()
            .filter(|a| a.generation == generation && !a.cancel.is_cancelled())
    }
}

/// Callback to deliver once the lock is released.
enum Notice {
    Matched(DecodedResult),
    Failed(ScanError),
    Diagnostic(DecodeError),
}

struct Shared {
    id: Uuid,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ScanState>,
    selector: DeviceSelector,
    streams: StreamController,
    decoder: Arc<dyn FrameDecoder>,
    observer: Arc<dyn ScanObserver>,
    settings: SessionSettings,
    /// Serializes stream requests so a stale acquisition settles (and is
    /// released) before the next attempt asks for the camera.
    acquire_gate: tokio::sync::Mutex<()>,
}

/// Scan session for one scanning surface.
///
/// Dropping the session tears it down: the running attempt is stopped and
/// any acquisition still in flight releases its stream when it settles.
pub struct ScanSession {
    shared: Arc<Shared>,
}

impl ScanSession {
    /// Build a session from configuration and its collaborators.
    pub fn new(
        config: &ScanConfig,
        media: Arc<dyn MediaDevices>,
        decoder: Arc<dyn FrameDecoder>,
        surface: Arc<dyn RenderSurface>,
        observer: Arc<dyn ScanObserver>,
    ) -> Self {
        Self::with_parts(
            DeviceSelector::from_config(&config.camera),
            StreamController::from_config(&config.camera, media, surface),
            decoder,
            observer,
            SessionSettings::from_config(config),
        )
    }

    /// Build a session from already-configured components.
    pub fn with_parts(
        selector: DeviceSelector,
        streams: StreamController,
        decoder: Arc<dyn FrameDecoder>,
        observer: Arc<dyn ScanObserver>,
        settings: SessionSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(ScanState::Idle);
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                inner: Mutex::new(Inner {
                    state: ScanState::Idle,
                    generation: 0,
                    attempt: None,
                    selected: None,
                    last_error: None,
                    result: None,
                }),
                state_tx,
                selector,
                streams,
                decoder,
                observer,
                settings,
                acquire_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Begin a scan attempt.
    ///
    /// Returns `AlreadyActive` without touching the running attempt if one is
    /// Acquiring or Scanning. Otherwise clears the previous error and result,
    /// moves to Acquiring and continues in a spawned task, so it must be
    /// called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ScanError> {
        let (generation, cancel) = {
            let mut inner = self.shared.lock();
            if inner.state.is_active() {
                tracing::warn!(state = %inner.state, "Scan start rejected: attempt already active");
                return Err(ScanError::already_active());
            }

            // Terminal transitions release everything; this only catches leftovers.
            if let Some(residual) = inner.attempt.take() {
                self.shared.release_attempt(residual);
            }

            inner.last_error = None;
            inner.result = None;
            inner.selected = None;
            inner.generation += 1;
            let attempt = Attempt::new(inner.generation);
            let handle = (attempt.generation, attempt.cancel.clone());
            inner.attempt = Some(attempt);
            self.shared.set_state(&mut inner, ScanState::Acquiring);
            handle
        };

        let span = tracing::info_span!(
            "scan.attempt",
            session = %self.shared.id,
            attempt = generation
        );
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.run_attempt(generation, cancel).await }.instrument(span));
        Ok(())
    }

    /// Stop the running attempt, if any.
    ///
    /// Releases the camera before the state becomes Stopped. An acquisition
    /// still waiting on the platform is abandoned and its stream released as
    /// soon as it arrives. No-op outside Acquiring and Scanning.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if !inner.state.is_active() {
            tracing::debug!(state = %inner.state, "Stop ignored: no active attempt");
            return;
        }
        self.shared.stop_locked(&mut inner, "stop requested");
    }

    /// Tear the session down from any state, ending in Stopped.
    pub fn teardown(&self) {
        let mut inner = self.shared.lock();
        if inner.state == ScanState::Stopped && inner.attempt.is_none() {
            return;
        }
        self.shared.stop_locked(&mut inner, "teardown");
    }

    /// Identifier for log correlation.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> ScanState {
        self.shared.lock().state
    }

    /// Watch state changes, e.g. for UI binding.
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the current attempt reaches a terminal state.
    ///
    /// Returns immediately with the current state if it is not active.
    pub async fn settled(&self) -> ScanState {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(|s| !s.is_active()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    pub fn last_error(&self) -> Option<ScanError> {
        self.shared.lock().last_error.clone()
    }

    pub fn result(&self) -> Option<DecodedResult> {
        self.shared.lock().result.clone()
    }

    /// Camera chosen by the most recent attempt.
    pub fn selected_camera(&self) -> Option<CameraSelector> {
        self.shared.lock().selected.clone()
    }

    /// True while an attempt holds a camera stream.
    pub fn has_active_stream(&self) -> bool {
        self.shared
            .lock()
            .attempt
            .as_ref()
            .map(|a| a.stream.is_some())
            .unwrap_or(false)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("scan session mutex poisoned")
    }

    fn set_state(&self, inner: &mut Inner, state: ScanState) {
        let previous = inner.state;
        inner.state = state;
        self.state_tx.send_replace(state);
        tracing::info!(from = %previous, to = %state, "Scan state changed");
    }

    /// Cancel an attempt and free what it holds: decode loop first, then the stream.
    fn release_attempt(&self, mut attempt: Attempt) {
        attempt.cancel.cancel();
        if let Some(decode_loop) = attempt.decode_loop.take() {
            decode_loop.stop();
        }
        self.streams.release(&mut attempt.stream);
    }

    fn stop_locked(&self, inner: &mut Inner, reason: &str) {
        if let Some(attempt) = inner.attempt.take() {
            tracing::info!(attempt = attempt.generation, reason, "Stopping scan attempt");
            self.release_attempt(attempt);
        }
        self.set_state(inner, ScanState::Stopped);
    }

    /// End the current attempt with an error. Caller delivers the notice.
    fn fail_locked(&self, inner: &mut Inner, error: ScanError) -> Notice {
        if let Some(attempt) = inner.attempt.take() {
            self.release_attempt(attempt);
        }
        tracing::warn!(
            kind = %error.kind,
            detail = error.detail.as_deref().unwrap_or(""),
            "Scan attempt failed"
        );
        inner.last_error = Some(error.clone());
        self.set_state(inner, ScanState::Error);
        Notice::Failed(error)
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Matched(result) => self.observer.on_match(&result),
            Notice::Failed(error) => self.observer.on_error(&error),
            Notice::Diagnostic(error) => self.observer.on_diagnostic(&error),
        }
    }

    async fn run_attempt(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let devices = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            devices = self.selector.list_devices(self.streams.media().as_ref()) => devices,
        };
        let selection = self.selector.resolve(&devices);

        {
            let mut inner = self.lock();
            if inner.current(generation).is_none() {
                return;
            }
            inner.selected = Some(selection.clone());
        }
        tracing::info!(camera = %selection, devices = devices.len(), "Camera selected");

        let gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            gate = self.acquire_gate.lock() => gate,
        };
        if cancel.is_cancelled() {
            return;
        }

        // Not raced against cancellation: a stream granted after a stop must
        // still be seen here so it can be released.
        let acquired = self.streams.acquire(&selection).await;
        let events = match acquired {
            Ok(stream) => self.on_acquired(generation, stream),
            Err(error) => {
                self.on_acquire_failed(generation, error);
                None
            }
        };
        drop(gate);

        if let Some(events) = events {
            self.pump_events(generation, cancel, events).await;
        }
    }

    /// Settle a successful acquisition. Returns the decode event stream when
    /// the attempt moved on to Scanning.
    fn on_acquired(
        &self,
        generation: u64,
        stream: MediaStream,
    ) -> Option<mpsc::Receiver<DecodeEvent>> {
        let mut inner = self.lock();
        let Some(attempt) = inner.current(generation) else {
            drop(inner);
            self.streams.discard(stream);
            return None;
        };

        self.streams.bind(&stream);
        let (decode_loop, events) = DecodeLoop::start(
            stream.clone(),
            Arc::clone(&self.decoder),
            self.settings.scan_interval,
        );
        attempt.stream = Some(stream);
        attempt.decode_loop = Some(decode_loop);
        self.set_state(&mut inner, ScanState::Scanning);
        Some(events)
    }

    fn on_acquire_failed(&self, generation: u64, error: ScanError) {
        let notice = {
            let mut inner = self.lock();
            if inner.current(generation).is_none() {
                tracing::debug!(kind = %error.kind, "Acquisition failed after attempt ended");
                return;
            }
            self.fail_locked(&mut inner, error)
        };
        self.notify(notice);
    }

    async fn pump_events(
        &self,
        generation: u64,
        cancel: CancellationToken,
        mut events: mpsc::Receiver<DecodeEvent>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                self.on_decode_loop_exit(generation).await;
                return;
            };

            let (notice, done) = self.on_decode_event(generation, event);
            if let Some(notice) = notice {
                self.notify(notice);
            }
            if done {
                return;
            }
        }
    }

    /// The decode loop stopped on its own while the attempt was still
    /// scanning: the decoder panicked or the task died. Ends the attempt
    /// with `DecoderFault` so the camera is released.
    async fn on_decode_loop_exit(&self, generation: u64) {
        let decode_loop = {
            let mut inner = self.lock();
            let Some(attempt) = inner.current(generation) else {
                return;
            };
            let decode_loop = attempt.decode_loop.take();
            decode_loop
        };

        let failure = match decode_loop {
            Some(mut decode_loop) => decode_loop.finished().await,
            None => None,
        };
        let detail = failure.unwrap_or_else(|| "decode loop exited unexpectedly".to_string());

        let notice = {
            let mut inner = self.lock();
            if inner.current(generation).is_none() {
                return;
            }
            self.fail_locked(&mut inner, ScanError::with_detail(ScanErrorKind::DecoderFault, detail))
        };
        self.notify(notice);
    }

    /// Apply one decode event. Returns the notice to deliver and whether the
    /// attempt is over.
    fn on_decode_event(&self, generation: u64, event: DecodeEvent) -> (Option<Notice>, bool) {
        let mut inner = self.lock();
        let max_faults = self.settings.max_consecutive_faults;
        let Some(attempt) = inner.current(generation) else {
            return (None, true);
        };

        match event {
            DecodeEvent::Decoded(result) => {
                if let Some(attempt) = inner.attempt.take() {
                    self.release_attempt(attempt);
                }
                tracing::info!(text = %result.text, "Barcode matched");
                inner.result = Some(result.clone());
                self.set_state(&mut inner, ScanState::Matched);
                (Some(Notice::Matched(result)), true)
            }
            DecodeEvent::Failed(DecodeError::StreamEnded) => {
                let error = ScanError::with_detail(
                    ScanErrorKind::DeviceUnavailable,
                    DecodeError::StreamEnded.to_string(),
                );
                (Some(self.fail_locked(&mut inner, error)), true)
            }
            DecodeEvent::Failed(DecodeError::Fault(detail)) => {
                attempt.consecutive_faults += 1;
                let faults = attempt.consecutive_faults;
                if faults >= max_faults {
                    let error = ScanError::with_detail(ScanErrorKind::DecoderFault, detail);
                    (Some(self.fail_locked(&mut inner, error)), true)
                } else {
                    tracing::warn!(faults, max_faults, detail = %detail, "Decoder fault, continuing");
                    (Some(Notice::Diagnostic(DecodeError::Fault(detail))), false)
                }
            }
            DecodeEvent::Failed(miss) => {
                attempt.consecutive_faults = 0;
                (Some(Notice::Diagnostic(miss)), false)
            }
        }
    }
}
