//! # soundpad-core
//!
//! Core types, error taxonomy, and engine events for the Soundpad soundboard.

pub mod board;
pub mod error;
pub mod events;
pub mod format;
pub mod gain;

pub use board::{Soundboard, Tile};
pub use error::{DeviceError, Error, FileError, PlaybackError, Result};
pub use events::{DeviceErrorCode, EngineEvent, ErrorCategory, FileErrorCode, PlaybackErrorCode};
pub use format::{
    ActiveSelection, DeviceSelection, OutputFormat, Setting, OUTPUT_CHANNELS,
    SUPPORTED_SAMPLE_RATES,
};
pub use gain::{clamp_volume, curve, MAX_VOLUME};
