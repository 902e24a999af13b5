//! Engine tuning loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use soundpad_core::{FileError, Result};

/// Sizing knobs for an engine session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Most clips that may play at once; also the mix bus slots reserved up front.
    pub voice_capacity: usize,
    /// Capacity of the queue that hands finished clips to the reaper thread.
    pub retire_capacity: usize,
    /// Fixed device buffer size in frames. `None` lets the driver choose.
    pub buffer_frames: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voice_capacity: 64,
            retire_capacity: 128,
            buffer_frames: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(FileError::NotFound(path.to_path_buf()).into());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
