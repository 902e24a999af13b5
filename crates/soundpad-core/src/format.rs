//! Output format constants and the device selection model.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::gain::clamp_volume;

/// Sample rates callers are expected to offer.
pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// The mix bus always renders interleaved stereo.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Format the mix bus renders at: stereo, 32-bit float, caller-selected rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OutputFormat {
    pub sample_rate: u32,
}

impl OutputFormat {
    pub const fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub const fn channels(&self) -> u16 {
        OUTPUT_CHANNELS
    }

    /// Number of interleaved samples for `frames` frames.
    pub const fn samples(&self, frames: usize) -> usize {
        frames * OUTPUT_CHANNELS as usize
    }
}

/// A value that may not have been chosen yet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting<T> {
    #[default]
    Unset,
    Set(T),
}

impl<T> Setting<T> {
    pub fn get(self) -> Option<T> {
        match self {
            Self::Unset => None,
            Self::Set(value) => Some(value),
        }
    }

    pub const fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }
}

impl<T> From<Option<T>> for Setting<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unset, Self::Set)
    }
}

/// Device, rate, and master volume chosen while the engine is stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSelection {
    pub device: Setting<String>,
    pub sample_rate: Setting<u32>,
    /// User-facing master volume in `[0.0, 2.0]`.
    pub volume: f32,
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self {
            device: Setting::Unset,
            sample_rate: Setting::Unset,
            volume: 1.0,
        }
    }
}

impl DeviceSelection {
    pub fn set_device(&mut self, device: impl Into<String>) {
        self.device = Setting::Set(device.into());
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = Setting::Set(rate);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
    }

    /// Check that device and rate are set and freeze the selection.
    pub fn resolve(&self) -> Result<ActiveSelection, DeviceError> {
        let Setting::Set(device) = &self.device else {
            return Err(DeviceError::DeviceNotSet);
        };
        let Setting::Set(rate) = self.sample_rate else {
            return Err(DeviceError::RateNotSet);
        };

        Ok(ActiveSelection {
            device: device.clone(),
            format: OutputFormat::new(rate),
        })
    }
}

/// The frozen selection of a running session. It has no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSelection {
    device: String,
    format: OutputFormat,
}

impl ActiveSelection {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub const fn format(&self) -> OutputFormat {
        self.format
    }
}
