//! Error types for Soundpad.

use std::path::PathBuf;

use thiserror::Error;

use crate::events::{DeviceErrorCode, EngineEvent, FileErrorCode, PlaybackErrorCode};

/// Result type alias using Soundpad's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Soundpad.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures while selecting, opening, or running the output device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("The audio engine is already running")]
    AlreadyRunning,

    #[error("No audio device has been selected")]
    DeviceNotSet,

    #[error("Audio device '{0}' was not found on this machine")]
    DeviceNotFound(String),

    #[error("No sample rate has been selected")]
    RateNotSet,

    #[error("Audio device '{device}' doesn't support {rate} Hz")]
    RateNotSupported { device: String, rate: u32 },

    #[error("The device and sample rate cannot be changed while the engine is running")]
    Locked,

    #[error("Audio driver fault on '{device}': {message}")]
    Driver { device: String, message: String },
}

impl DeviceError {
    /// Stable machine code for this error.
    pub const fn code(&self) -> DeviceErrorCode {
        match self {
            Self::AlreadyRunning => DeviceErrorCode::AlreadyRunning,
            Self::DeviceNotSet => DeviceErrorCode::DeviceNotSet,
            Self::DeviceNotFound(_) => DeviceErrorCode::DeviceNotFound,
            Self::RateNotSet => DeviceErrorCode::RateNotSet,
            Self::RateNotSupported { .. } => DeviceErrorCode::RateNotSupported,
            Self::Locked => DeviceErrorCode::Locked,
            Self::Driver { .. } => DeviceErrorCode::DriverFault,
        }
    }

    /// The device this error concerns, when one is known.
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::DeviceNotFound(device)
            | Self::RateNotSupported { device, .. }
            | Self::Driver { device, .. } => Some(device),
            _ => None,
        }
    }
}

/// Failures while locating, reading, or writing audio files.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot read audio from {}: {message}", .path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("Cannot write {}: {message}", .path.display())]
    WriteFailed { path: PathBuf, message: String },
}

impl FileError {
    /// Stable machine code for this error.
    pub const fn code(&self) -> FileErrorCode {
        match self {
            Self::NotFound(_) => FileErrorCode::NotFound,
            Self::Unreadable { .. } => FileErrorCode::Unreadable,
            Self::WriteFailed { .. } => FileErrorCode::WriteFailed,
        }
    }

    /// The path this error concerns.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::NotFound(path)
            | Self::Unreadable { path, .. }
            | Self::WriteFailed { path, .. } => path,
        }
    }

    /// Shorthand for [`FileError::Unreadable`].
    pub fn unreadable(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Unreadable {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Failures of a play request that are not tied to the file itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("The audio engine is stopped; start it before playing sounds")]
    EngineStopped,

    #[error(
        "{} uses {actual_rate} Hz but the engine runs at {required_rate} Hz; resample it first",
        .path.display()
    )]
    UnsupportedSampleRate {
        path: PathBuf,
        required_rate: u32,
        actual_rate: u32,
    },

    #[error("Too many sounds are playing (limit {limit}); wait or stop some first")]
    TooManySounds { limit: usize },
}

impl PlaybackError {
    /// Stable machine code for this error.
    pub const fn code(&self) -> PlaybackErrorCode {
        match self {
            Self::EngineStopped => PlaybackErrorCode::EngineStopped,
            Self::UnsupportedSampleRate { .. } => PlaybackErrorCode::UnsupportedSampleRate,
            Self::TooManySounds { .. } => PlaybackErrorCode::TooManySounds,
        }
    }
}

impl Error {
    /// Build the notification listeners receive for this error, if it has one.
    ///
    /// Generic errors (IO, JSON, internal) are returned to the caller only.
    pub fn to_event(&self) -> Option<EngineEvent> {
        match self {
            Self::Device(err) => Some(EngineEvent::from(err)),
            Self::File(err) => Some(EngineEvent::from(err)),
            Self::Playback(err) => Some(EngineEvent::from(err)),
            _ => None,
        }
    }

    /// Returns true if retrying after the user resamples the file can succeed.
    pub const fn needs_resample(&self) -> bool {
        matches!(
            self,
            Self::Playback(PlaybackError::UnsupportedSampleRate { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(DeviceError::RateNotSupported {
            device: "Focusrite USB ASIO".into(),
            rate: 96000,
        });
        assert_eq!(
            err.to_string(),
            "Audio device 'Focusrite USB ASIO' doesn't support 96000 Hz"
        );
    }

    #[test]
    fn test_device_of_error() {
        assert_eq!(
            DeviceError::DeviceNotFound("X".into()).device(),
            Some("X")
        );
        assert_eq!(DeviceError::AlreadyRunning.device(), None);
    }

    #[test]
    fn test_needs_resample() {
        let err = Error::from(PlaybackError::UnsupportedSampleRate {
            path: "a.wav".into(),
            required_rate: 48000,
            actual_rate: 44100,
        });
        assert!(err.needs_resample());
        assert!(!Error::from(PlaybackError::EngineStopped).needs_resample());
        assert!(!Error::from(PlaybackError::TooManySounds { limit: 64 }).needs_resample());
    }

    #[test]
    fn test_generic_errors_have_no_event() {
        assert!(Error::Internal("boom".into()).to_event().is_none());
        assert!(Error::from(FileError::NotFound("x.wav".into()))
            .to_event()
            .is_some());
    }
}
