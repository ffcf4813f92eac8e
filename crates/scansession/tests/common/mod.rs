//! Shared fixtures for session integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scansession::sim::{RecordingSurface, ScriptedDecoder, SimCamera};
use scansession::{
    DecodeError, DecodedResult, DeviceSelector, FrameDecoder, ScanError, ScanObserver,
    ScanSession, ScanState, SessionSettings, StreamController,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Observer that records every callback along with how many camera streams
/// were still live when it fired.
pub struct RecordingObserver {
    camera: Arc<SimCamera>,
    matches: Mutex<Vec<(String, usize)>>,
    errors: Mutex<Vec<(ScanError, usize)>>,
    diagnostics: Mutex<Vec<DecodeError>>,
}

impl RecordingObserver {
    pub fn new(camera: Arc<SimCamera>) -> Self {
        Self {
            camera,
            matches: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    /// Matched texts with the live stream count seen at callback time.
    pub fn matches(&self) -> Vec<(String, usize)> {
        self.matches.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(ScanError, usize)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn diagnostics(&self) -> Vec<DecodeError> {
        self.diagnostics.lock().unwrap().clone()
    }
}

impl ScanObserver for RecordingObserver {
    fn on_match(&self, result: &DecodedResult) {
        let live = self.camera.stats().live_streams;
        self.matches.lock().unwrap().push((result.text.clone(), live));
    }

    fn on_error(&self, error: &ScanError) {
        let live = self.camera.stats().live_streams;
        self.errors.lock().unwrap().push((error.clone(), live));
    }

    fn on_diagnostic(&self, error: &DecodeError) {
        self.diagnostics.lock().unwrap().push(error.clone());
    }
}

pub struct Harness {
    pub session: ScanSession,
    pub camera: Arc<SimCamera>,
    pub surface: Arc<RecordingSurface>,
    pub observer: Arc<RecordingObserver>,
}

pub fn harness(camera: SimCamera, decoder: ScriptedDecoder) -> Harness {
    harness_with_faults(camera, decoder, 3)
}

pub fn harness_with_faults(
    camera: SimCamera,
    decoder: ScriptedDecoder,
    max_consecutive_faults: u32,
) -> Harness {
    let settings = SessionSettings {
        scan_interval: Duration::from_millis(5),
        max_consecutive_faults,
    };
    harness_with_settings(camera, Arc::new(decoder), settings)
}

pub fn harness_with_settings(
    camera: SimCamera,
    decoder: Arc<dyn FrameDecoder>,
    settings: SessionSettings,
) -> Harness {
    init_tracing();
    let camera = Arc::new(camera);
    let surface = Arc::new(RecordingSurface::new());
    let observer = Arc::new(RecordingObserver::new(camera.clone()));
    let session = ScanSession::with_parts(
        DeviceSelector::default(),
        StreamController::new(camera.clone(), surface.clone()).with_ideal_resolution(1280, 720),
        decoder,
        observer.clone(),
        settings,
    );
    Harness {
        session,
        camera,
        surface,
        observer,
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

/// Bound a future so a broken session fails the test instead of hanging it.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

pub async fn wait_for_state(session: &ScanSession, state: ScanState) {
    let mut rx = session.subscribe();
    within(rx.wait_for(|s| *s == state))
        .await
        .expect("state channel closed");
}
