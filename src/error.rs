use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the camera stream could not be acquired
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraError {
    #[error("camera access denied")]
    Denied,

    #[error("camera is in use by another application")]
    Busy,

    #[error("camera unavailable for an unknown reason")]
    Unknown,
}

/// Navigation engine error types
#[derive(Error, Debug)]
pub enum NavError {
    #[error("Motion sensor permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),

    #[error("Calibration skip not available for another {remaining_secs:.1}s")]
    SkipUnavailable { remaining_secs: f64 },

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Session already closed")]
    SessionClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for navigation operations
pub type NavResult<T> = Result<T, NavError>;

/// Failure surfaced to the presentation layer while permissions are pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum AccessFailure {
    MotionDenied,
    Camera(CameraError),
}

impl AccessFailure {
    /// User-facing message for the permission screen
    pub fn message(&self) -> &'static str {
        match self {
            AccessFailure::MotionDenied => {
                "Motion sensor access was denied. Allow motion access and try again."
            }
            AccessFailure::Camera(CameraError::Denied) => {
                "Camera access was denied. Allow camera access and try again."
            }
            AccessFailure::Camera(CameraError::Busy) => {
                "The camera is being used by another app. Close it and try again."
            }
            AccessFailure::Camera(CameraError::Unknown) => {
                "The camera could not be started. Try again."
            }
        }
    }
}

impl From<AccessFailure> for NavError {
    fn from(failure: AccessFailure) -> Self {
        match failure {
            AccessFailure::MotionDenied => NavError::PermissionDenied,
            AccessFailure::Camera(cause) => NavError::CameraUnavailable(cause),
        }
    }
}
