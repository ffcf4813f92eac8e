//! Scan error taxonomy
//!
//! Every failure of a scan attempt is reduced to a [`ScanError`] with a fixed
//! kind and a message fit to show the user. Collaborator errors
//! ([`MediaError`], decoder faults) are classified here.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::device::CameraSelector;
use crate::media::MediaError;

/// Classified cause of a failed scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorKind {
    /// The user declined camera access or it is blocked.
    PermissionDenied,
    /// No device could be enumerated and the facing-mode fallback failed too.
    NoCameraAvailable,
    /// The camera is busy, was removed, or stopped delivering frames.
    DeviceUnavailable,
    /// The requested device or resolution cannot be provided.
    ConstraintsNotSatisfiable,
    /// The decoder failed in a way other than "no barcode in this frame".
    DecoderFault,
    /// A start was requested while an attempt is already running.
    AlreadyActive,
}

impl ScanErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanErrorKind::PermissionDenied => "permission_denied",
            ScanErrorKind::NoCameraAvailable => "no_camera_available",
            ScanErrorKind::DeviceUnavailable => "device_unavailable",
            ScanErrorKind::ConstraintsNotSatisfiable => "constraints_not_satisfiable",
            ScanErrorKind::DecoderFault => "decoder_fault",
            ScanErrorKind::AlreadyActive => "already_active",
        }
    }

    /// User-facing message for this kind.
    pub fn message(&self) -> &'static str {
        match self {
            ScanErrorKind::PermissionDenied => {
                "Unable to access camera. Please check permissions."
            }
            ScanErrorKind::NoCameraAvailable => "No camera detected on this device.",
            ScanErrorKind::DeviceUnavailable => {
                "The camera is unavailable. Close other apps using it and try again."
            }
            ScanErrorKind::ConstraintsNotSatisfiable => {
                "The camera does not support the requested settings."
            }
            ScanErrorKind::DecoderFault => "The barcode reader failed. Please try again.",
            ScanErrorKind::AlreadyActive => "A scan is already in progress.",
        }
    }
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified scan failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct ScanError {
    pub kind: ScanErrorKind,

    /// Human-readable message for the user.
    pub message: String,

    /// Collaborator detail for logs, not meant for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ScanError {
    pub fn new(kind: ScanErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            detail: None,
        }
    }

    pub fn with_detail(kind: ScanErrorKind, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(kind)
        }
    }

    pub fn already_active() -> Self {
        Self::new(ScanErrorKind::AlreadyActive)
    }

    /// Classify a failed stream request.
    ///
    /// Permission failures are always `PermissionDenied`. Any other failure
    /// of the facing-mode fallback means no device could be enumerated and
    /// none could be opened either, so it is `NoCameraAvailable`. For a
    /// concrete device the cause is kept apart: gone or busy devices are
    /// `DeviceUnavailable`, unsupported resolutions are
    /// `ConstraintsNotSatisfiable`.
    pub fn from_media(err: &MediaError, selector: &CameraSelector) -> Self {
        let fallback = matches!(selector, CameraSelector::FacingMode(_));
        let kind = match err {
            MediaError::NotAllowed(_) | MediaError::Security(_) => ScanErrorKind::PermissionDenied,
            _ if fallback => ScanErrorKind::NoCameraAvailable,
            MediaError::NotFound(_) => ScanErrorKind::DeviceUnavailable,
            MediaError::Overconstrained { .. } => ScanErrorKind::ConstraintsNotSatisfiable,
            MediaError::NotReadable(_) | MediaError::Aborted(_) | MediaError::Other(_) => {
                ScanErrorKind::DeviceUnavailable
            }
        };
        Self::with_detail(kind, err.to_string())
    }
}
