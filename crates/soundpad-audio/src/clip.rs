//! Playable sources: one audio file opened for playback.

use std::path::{Path, PathBuf};

use soundpad_core::FileError;
use tracing::warn;

use crate::decode::AudioDecoder;

/// One file opened for playback.
///
/// Produces a finite, non-restartable stream of interleaved frames at the
/// file's native rate and channel count. A short read marks end of stream.
/// The gain multiplier is fixed once the clip is built.
pub struct Clip {
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    gain: f32,
    /// Decoded samples not yet handed out.
    pending: Vec<f32>,
    cursor: usize,
    /// Remaining undecoded stream. `None` once everything is in `pending`.
    decoder: Option<AudioDecoder>,
}

impl Clip {
    /// Open a file and read its header. Nothing is decoded yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let decoder = AudioDecoder::open(path)?;
        Ok(Self {
            path: decoder.path().to_path_buf(),
            sample_rate: decoder.sample_rate(),
            channels: decoder.channels(),
            gain: 1.0,
            pending: Vec::new(),
            cursor: 0,
            decoder: Some(decoder),
        })
    }

    /// Build a clip from samples already in memory.
    pub fn from_samples(
        label: impl Into<PathBuf>,
        sample_rate: u32,
        channels: u16,
        samples: Vec<f32>,
    ) -> Self {
        Self {
            path: label.into(),
            sample_rate,
            channels: channels.max(1),
            gain: 1.0,
            pending: samples,
            cursor: 0,
            decoder: None,
        }
    }

    /// Set the amplitude multiplier applied to every produced sample.
    #[must_use]
    pub const fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    pub const fn gain(&self) -> f32 {
        self.gain
    }

    /// Decode the remainder of the file into memory.
    ///
    /// After this, [`Clip::read`] never touches the file system.
    pub fn preload(&mut self) -> Result<(), FileError> {
        if let Some(mut decoder) = self.decoder.take() {
            let rest = decoder.decode_to_end()?;
            self.compact();
            self.pending.extend_from_slice(&rest);
            self.channels = decoder.channels();
        }
        Ok(())
    }

    /// Frames left in memory.
    pub fn buffered_frames(&self) -> usize {
        (self.pending.len() - self.cursor) / usize::from(self.channels)
    }

    /// Returns true when no further frames will be produced.
    pub fn is_finished(&self) -> bool {
        self.decoder.is_none() && self.cursor >= self.pending.len()
    }

    /// Fill `out` with interleaved frames, gain applied.
    ///
    /// `out.len()` should be a multiple of the channel count. Returns the
    /// number of frames written; fewer than requested means end of stream.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = usize::from(self.channels);
        let wanted = out.len() / channels * channels;
        let mut written = 0;

        while written < wanted {
            if self.cursor >= self.pending.len() && !self.refill() {
                break;
            }

            let available = self.pending.len() - self.cursor;
            let n = available.min(wanted - written);
            let src = &self.pending[self.cursor..self.cursor + n];
            for (dst, &s) in out[written..written + n].iter_mut().zip(src) {
                *dst = s * self.gain;
            }
            self.cursor += n;
            written += n;
        }

        written / channels
    }

    /// Pull the next packet from the decoder into `pending`.
    fn refill(&mut self) -> bool {
        let Some(decoder) = self.decoder.as_mut() else {
            return false;
        };

        match decoder.decode_next() {
            Ok(Some(samples)) => {
                self.pending.clear();
                self.pending.extend_from_slice(samples);
                self.cursor = 0;
                true
            }
            Ok(None) => {
                self.decoder = None;
                false
            }
            Err(e) => {
                warn!("Ending {} early: {e}", self.path.display());
                self.decoder = None;
                false
            }
        }
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.pending.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}

impl std::fmt::Debug for Clip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clip")
            .field("path", &self.path)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("gain", &self.gain)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::float_cmp)]

    use super::*;
    use crate::decode::testing::write_wav;

    #[test]
    fn test_read_applies_gain_and_ends() {
        let mut clip = Clip::from_samples("mem", 48000, 2, vec![0.5; 10]).with_gain(0.5);
        let mut out = [0.0f32; 8];

        assert_eq!(clip.read(&mut out), 4);
        assert!(out.iter().all(|&s| s == 0.25));
        assert!(!clip.is_finished());

        assert_eq!(clip.read(&mut out), 1);
        assert!(clip.is_finished());
        assert_eq!(clip.read(&mut out), 0);
    }

    #[test]
    fn test_lazy_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "mono.wav", 48000, 1, 3000, 0.1);

        let mut clip = Clip::open(&path).unwrap();
        assert_eq!(clip.sample_rate(), 48000);
        assert_eq!(clip.channels(), 1);

        let mut out = vec![0.0f32; 4096];
        assert_eq!(clip.read(&mut out), 3000);
        assert!(clip.is_finished());
    }

    #[test]
    fn test_preload_keeps_unread_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "st.wav", 44100, 2, 500, 0.2);

        let mut clip = Clip::open(&path).unwrap();
        let mut out = [0.0f32; 20];
        assert_eq!(clip.read(&mut out), 10);

        clip.preload().unwrap();
        assert_eq!(clip.buffered_frames(), 490);
        assert!(!clip.is_finished());

        let mut rest = vec![0.0f32; 2000];
        assert_eq!(clip.read(&mut rest), 490);
        assert!(clip.is_finished());
    }

    #[test]
    fn test_open_missing_file() {
        let err = Clip::open("nowhere.wav").unwrap_err();
        assert_eq!(err, FileError::NotFound("nowhere.wav".into()));
    }
}
