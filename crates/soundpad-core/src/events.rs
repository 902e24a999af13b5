//! Notifications published by the engine.
//!
//! Events serialize as a `{"type": ..., "data": ...}` envelope so a UI layer can
//! forward them verbatim.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{DeviceError, FileError, PlaybackError};

/// Broad class of an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Device,
    File,
    Playback,
}

/// Machine code of a device error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceErrorCode {
    AlreadyRunning,
    DeviceNotSet,
    DeviceNotFound,
    RateNotSet,
    RateNotSupported,
    Locked,
    DriverFault,
}

/// Machine code of a file error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileErrorCode {
    NotFound,
    Unreadable,
    WriteFailed,
}

/// Machine code of a playback error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackErrorCode {
    EngineStopped,
    UnsupportedSampleRate,
    TooManySounds,
}

/// Events emitted by the soundboard engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine started or stopped.
    #[serde(rename = "audio_engine_status")]
    EngineStatusChanged { active: bool },

    /// Device selection, start-up, or a running stream failed.
    DeviceError {
        code: DeviceErrorCode,
        device: Option<String>,
        description: String,
    },

    /// A file could not be found, read, or written.
    FileError {
        code: FileErrorCode,
        path: PathBuf,
        description: String,
    },

    /// A play request was refused for a reason other than the file itself.
    PlaybackError {
        code: PlaybackErrorCode,
        description: String,
    },

    /// A file must be resampled to `required_rate` before it can be played.
    #[serde(rename = "file_resample_needed")]
    ResampleNeeded {
        path: PathBuf,
        required_rate: u32,
        description: String,
    },
}

impl EngineEvent {
    /// Category of an error event, `None` for status changes.
    pub const fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::EngineStatusChanged { .. } => None,
            Self::DeviceError { .. } => Some(ErrorCategory::Device),
            Self::FileError { .. } => Some(ErrorCategory::File),
            Self::PlaybackError { .. } | Self::ResampleNeeded { .. } => {
                Some(ErrorCategory::Playback)
            }
        }
    }

    /// Returns true for every event except status changes.
    pub const fn is_error(&self) -> bool {
        self.category().is_some()
    }
}

impl From<&DeviceError> for EngineEvent {
    fn from(err: &DeviceError) -> Self {
        Self::DeviceError {
            code: err.code(),
            device: err.device().map(String::from),
            description: err.to_string(),
        }
    }
}

impl From<&FileError> for EngineEvent {
    fn from(err: &FileError) -> Self {
        Self::FileError {
            code: err.code(),
            path: err.path().clone(),
            description: err.to_string(),
        }
    }
}

impl From<&PlaybackError> for EngineEvent {
    fn from(err: &PlaybackError) -> Self {
        match err {
            PlaybackError::UnsupportedSampleRate {
                path,
                required_rate,
                ..
            } => Self::ResampleNeeded {
                path: path.clone(),
                required_rate: *required_rate,
                description: err.to_string(),
            },
            PlaybackError::EngineStopped | PlaybackError::TooManySounds { .. } => {
                Self::PlaybackError {
                    code: err.code(),
                    description: err.to_string(),
                }
            }
        }
    }
}
