//! scansession - camera barcode scan sessions
//!
//! Drives one barcode scan from camera selection to a single decoded result,
//! and guarantees the camera is switched off however the attempt ends:
//! match, user stop, permission denial, device removal, or the owner going
//! away mid-acquisition.
//!
//! # Components
//!
//! - **Device selection** ([`DeviceSelector`]): prefers a rear camera by
//!   label, falls back to the first device, then to a facing-mode hint.
//! - **Stream control** ([`StreamController`]): acquires and releases the
//!   camera stream, stopping every track.
//! - **Decode loop** ([`DecodeLoop`]): feeds frames to the external
//!   [`FrameDecoder`] at a fixed pace.
//! - **Session** ([`ScanSession`]): the state machine tying them together.
//!
//! The platform camera and barcode decoder are collaborators behind the
//! [`MediaDevices`], [`RenderSurface`] and [`FrameDecoder`] traits. The
//! [`sim`] module provides an in-process implementation of all three.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scansession::sim::{ScriptedDecoder, SimCamera};
//! use scansession::{NoopObserver, NullSurface, ScanSession, ScanState};
//!
//! # async fn demo() {
//! let session = ScanSession::new(
//!     &scanconf::ScanConfig::default(),
//!     Arc::new(SimCamera::new()),
//!     Arc::new(ScriptedDecoder::code_after(3, "FE001")),
//!     Arc::new(NullSurface),
//!     Arc::new(NoopObserver),
//! );
//!
//! session.start().expect("no attempt running yet");
//! assert_eq!(session.settled().await, ScanState::Matched);
//! assert_eq!(session.result().unwrap().text, "FE001");
//! # }
//! ```

pub mod decode;
pub mod device;
pub mod error;
pub mod media;
pub mod session;
pub mod sim;
pub mod stream;

pub use decode::{DecodeError, DecodeEvent, DecodeLoop, DecodedResult, FrameDecoder};
pub use device::{CameraSelector, DeviceSelector, VideoInputDevice};
pub use error::{ScanError, ScanErrorKind};
pub use media::{
    FacingMode, MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack, NullSurface,
    RenderSurface,
};
pub use session::{NoopObserver, ScanObserver, ScanSession, ScanState, SessionSettings};
pub use stream::StreamController;
