//! Decode loop
//!
//! Samples frames from a live stream at a fixed pace and hands each one to
//! the external [`FrameDecoder`]. Outcomes are reported over a channel; the
//! loop never decides on its own to stop after a match, the session does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::media::MediaStream;

/// Outcome of one frame decode attempt that produced no text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No barcode in this frame.
    #[error("no barcode found in frame")]
    NoMatch,

    /// A barcode was seen but its checksum did not verify.
    #[error("barcode checksum mismatch")]
    Checksum,

    /// A barcode was seen but could not be parsed.
    #[error("barcode format not recognized")]
    Format,

    /// The stream stopped delivering frames (device removed or track ended).
    #[error("camera stream ended")]
    StreamEnded,

    /// Unexpected decoder failure.
    #[error("decoder fault: {0}")]
    Fault(String),
}

impl DecodeError {
    /// True for per-frame misses that are normal while aiming the camera.
    pub fn is_transient(&self) -> bool {
        matches!(self, DecodeError::NoMatch | DecodeError::Checksum | DecodeError::Format)
    }
}

/// External barcode decoder.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    /// Grab the current frame of `stream` and try to decode one barcode.
    async fn decode_frame(&self, stream: &MediaStream) -> Result<String, DecodeError>;
}

/// A decoded barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedResult {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl DecodedResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Event emitted by a running decode loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Decoded(DecodedResult),
    Failed(DecodeError),
}

const EVENT_BUFFER: usize = 16;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running decode loop. Stops the loop when dropped.
#[derive(Debug)]
pub struct DecodeLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DecodeLoop {
    /// Spawn a loop decoding one frame of `stream` every `interval`.
    ///
    /// The first attempt runs immediately and `interval` is raised to at
    /// least 1ms. The returned receiver closes once the loop has stopped,
    /// including when the decoder panics. Must be called from within a tokio
    /// runtime.
    pub fn start(
        stream: MediaStream,
        decoder: Arc<dyn FrameDecoder>,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<DecodeEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = interval.max(MIN_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut frames: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    outcome = decoder.decode_frame(&stream) => outcome,
                };
                frames += 1;

                let event = match outcome {
                    Ok(text) => {
                        tracing::debug!(frame = frames, text = %text, "Frame decoded");
                        DecodeEvent::Decoded(DecodedResult::new(text))
                    }
                    Err(e) => {
                        tracing::trace!(frame = frames, error = %e, "Frame not decoded");
                        DecodeEvent::Failed(e)
                    }
                };

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(stream_id = %stream.id(), frames, "Decode loop stopped");
        });

        (Self { cancel, task }, rx)
    }

    /// Stop sampling frames. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop task to exit. Returns a description of the failure
    /// when it did not end normally, e.g. because the decoder panicked.
    pub async fn finished(&mut self) -> Option<String> {
        match (&mut self.task).await {
            Ok(()) => None,
            Err(e) if e.is_panic() => Some(format!("decoder panicked: {}", e)),
            Err(e) => Some(e.to_string()),
        }
    }
}

impl Drop for DecodeLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaConstraints, MediaDevices};
    use crate::sim::{ScriptedDecoder, SimCamera};

    async fn live_stream(camera: &SimCamera) -> MediaStream {
        camera
            .get_user_media(MediaConstraints {
                device_id: Some("1".into()),
                ..MediaConstraints::default()
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_transient_classification() {
        assert!(DecodeError::NoMatch.is_transient());
        assert!(DecodeError::Checksum.is_transient());
        assert!(DecodeError::Format.is_transient());
        assert!(!DecodeError::StreamEnded.is_transient());
        assert!(!DecodeError::Fault("boom".into()).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reports_misses_then_result() {
        let camera = SimCamera::new();
        let stream = live_stream(&camera).await;
        let decoder = Arc::new(ScriptedDecoder::code_after(2, "FE001"));

        let (handle, mut rx) = DecodeLoop::start(stream, decoder, Duration::from_millis(100));

        assert_eq!(rx.recv().await, Some(DecodeEvent::Failed(DecodeError::NoMatch)));
        assert_eq!(rx.recv().await, Some(DecodeEvent::Failed(DecodeError::NoMatch)));
        match rx.recv().await {
            Some(DecodeEvent::Decoded(result)) => assert_eq!(result.text, "FE001"),
            other => panic!("expected decoded result, got {:?}", other),
        }

        handle.stop();
        assert!(handle.is_stopped());
        while rx.recv().await.is_some() {}
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_keeps_running_after_result_until_stopped() {
        let camera = SimCamera::new();
        let stream = live_stream(&camera).await;
        let decoder = Arc::new(ScriptedDecoder::code_after(0, "FE001"));

        let (handle, mut rx) = DecodeLoop::start(stream, decoder.clone(), Duration::from_millis(50));

        assert!(matches!(rx.recv().await, Some(DecodeEvent::Decoded(_))));
        assert!(matches!(rx.recv().await, Some(DecodeEvent::Decoded(_))));

        handle.stop();
        // Drain whatever was buffered; the channel closes once the task exits
        while rx.recv().await.is_some() {}
        assert!(decoder.frames_decoded() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_loop() {
        let camera = SimCamera::new();
        let stream = live_stream(&camera).await;
        let decoder = Arc::new(ScriptedDecoder::code_after(1000, "never"));

        let (handle, mut rx) = DecodeLoop::start(stream, decoder, Duration::from_millis(10));
        assert!(rx.recv().await.is_some());

        drop(handle);
        while rx.recv().await.is_some() {}
    }

    struct PanickingDecoder;

    #[async_trait]
    impl FrameDecoder for PanickingDecoder {
        async fn decode_frame(&self, _stream: &MediaStream) -> Result<String, DecodeError> {
            panic!("decoder blew up");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let camera = SimCamera::new();
        let stream = live_stream(&camera).await;
        let decoder = Arc::new(ScriptedDecoder::code_after(1, "FE001"));

        let (mut handle, mut rx) = DecodeLoop::start(stream, decoder, Duration::ZERO);
        assert_eq!(rx.recv().await, Some(DecodeEvent::Failed(DecodeError::NoMatch)));
        assert!(matches!(rx.recv().await, Some(DecodeEvent::Decoded(_))));

        handle.stop();
        while rx.recv().await.is_some() {}
        assert_eq!(handle.finished().await, None);
    }

    #[tokio::test]
    async fn test_decoder_panic_closes_channel() {
        let camera = SimCamera::new();
        let stream = live_stream(&camera).await;

        let (mut handle, mut rx) =
            DecodeLoop::start(stream, Arc::new(PanickingDecoder), Duration::from_millis(10));
        assert_eq!(rx.recv().await, None);
        assert!(!handle.is_stopped());

        let failure = handle.finished().await.expect("panic reported");
        assert!(failure.starts_with("decoder panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_stream_reports_stream_ended() {
        let camera = SimCamera::new();
        let stream = live_stream(&camera).await;
        stream.stop_all_tracks();
        let decoder = Arc::new(ScriptedDecoder::code_after(0, "FE001"));

        let (_handle, mut rx) = DecodeLoop::start(stream, decoder, Duration::from_millis(10));
        assert_eq!(rx.recv().await, Some(DecodeEvent::Failed(DecodeError::StreamEnded)));
    }
}
