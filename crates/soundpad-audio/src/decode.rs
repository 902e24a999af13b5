//! Audio file decoding using symphonia.

use std::fs::File;
use std::path::{Path, PathBuf};

use soundpad_core::FileError;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

/// Streaming decoder over one audio file.
pub struct AudioDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    samples: Option<SampleBuffer<f32>>,
}

impl AudioDecoder {
    /// Open a file and read its header.
    ///
    /// Fails with [`FileError::NotFound`] when the path does not exist and
    /// [`FileError::Unreadable`] when it is not a decodable audio file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(FileError::NotFound(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|e| FileError::unreadable(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| FileError::unreadable(path, format!("failed to probe format: {e}")))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| FileError::unreadable(path, "no audio tracks found"))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| FileError::unreadable(path, "unknown sample rate"))?;
        let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| FileError::unreadable(path, format!("failed to create decoder: {e}")))?;

        debug!(
            "Opened {}: track={}, {} Hz, {} channels",
            path.display(),
            track_id,
            sample_rate,
            channels
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            samples: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Native sample rate read from the file header.
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count of the decoded stream.
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet into interleaved f32 samples.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<&[f32]>, FileError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => {
                    return Err(FileError::unreadable(
                        &self.path,
                        format!("failed to read packet: {e}"),
                    ));
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let needed = decoded.capacity() * spec.channels.count();
                    if self.samples.as_ref().map_or(true, |b| b.capacity() < needed) {
                        self.samples = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    self.channels = spec.channels.count() as u16;

                    if let Some(buffer) = self.samples.as_mut() {
                        buffer.copy_interleaved_ref(decoded);
                    }
                    break;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error in {} (skipping): {e}", self.path.display());
                }
                Err(e) => {
                    return Err(FileError::unreadable(
                        &self.path,
                        format!("decode failed: {e}"),
                    ));
                }
            }
        }

        Ok(self.samples.as_ref().map(SampleBuffer::samples))
    }

    /// Decode the rest of the stream into one interleaved buffer.
    pub fn decode_to_end(&mut self) -> Result<Vec<f32>, FileError> {
        let mut all = Vec::new();
        while let Some(samples) = self.decode_next()? {
            all.extend_from_slice(samples);
        }
        Ok(all)
    }
}
