//! Offline sample-rate conversion using rubato.

use std::fmt::Display;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rubato::{FftFixedIn, Resampler};
use soundpad_core::{Error, FileError, Result};
use tracing::{debug, info};

use crate::decode::AudioDecoder;

/// Input frames per resampler call.
const CHUNK_FRAMES: usize = 1024;

/// Extension of every resampled file.
pub const OUTPUT_EXTENSION: &str = "wav";

/// Where [`resample_file`] writes its output for `path`.
pub fn output_path(path: &Path) -> PathBuf {
    path.with_extension(OUTPUT_EXTENSION)
}

/// Convert interleaved samples from `from_rate` to `to_rate`.
///
/// The output has the same channel count and `ceil(frames * to / from)` frames.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>> {
    if channels == 0 {
        return Err(Error::InvalidArgument("channel count must be non-zero".into()));
    }
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let frames = input.len() / channels;
    let planar = deinterleave(input, channels);

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_FRAMES,
        2,
        channels,
    )
    .map_err(|e| Error::Internal(format!("Failed to create resampler: {e}")))?;

    let delay = resampler.output_delay();
    let expected = expected_frames(frames, from_rate, to_rate);
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];

    let mut pos = 0;
    while pos + CHUNK_FRAMES <= frames {
        let chunk: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..pos + CHUNK_FRAMES]).collect();
        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| Error::Internal(format!("Resample failed: {e}")))?;
        append(&mut output, &resampled);
        pos += CHUNK_FRAMES;
    }

    if pos < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..]).collect();
        let resampled = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| Error::Internal(format!("Resample failed: {e}")))?;
        append(&mut output, &resampled);
    }

    // Drain the filter delay.
    while output[0].len() < expected + delay {
        let resampled = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| Error::Internal(format!("Resample failed: {e}")))?;
        if resampled[0].is_empty() {
            break;
        }
        append(&mut output, &resampled);
    }

    for ch in &mut output {
        ch.drain(..delay.min(ch.len()));
        ch.truncate(expected);
    }

    debug!(
        "Resampled {frames} frames {from_rate} Hz -> {} frames {to_rate} Hz",
        output[0].len()
    );

    Ok(interleave(&output))
}

/// Decode `path`, convert it to `target_rate`, and write a 32-bit float WAV
/// next to it. Returns the written path.
///
/// An existing file there, including `path` itself, is replaced only once
/// the new file is complete.
pub fn resample_file(path: impl AsRef<Path>, target_rate: u32) -> Result<PathBuf> {
    let path = path.as_ref();
    if target_rate == 0 {
        return Err(Error::InvalidArgument("target rate must be non-zero".into()));
    }

    let mut decoder = AudioDecoder::open(path)?;
    let samples = decoder.decode_to_end()?;
    let channels = decoder.channels();
    let source_rate = decoder.sample_rate();
    drop(decoder);

    let converted = resample_interleaved(&samples, usize::from(channels), source_rate, target_rate)?;

    let out = output_path(path);
    write_wav(&out, channels, target_rate, &converted)?;

    info!(
        "Resampled {} ({source_rate} Hz) to {} ({target_rate} Hz)",
        path.display(),
        out.display()
    );
    Ok(out)
}

/// Stage the WAV in a temporary file beside `path`, then rename it into place.
fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[f32]) -> Result<()> {
    let failed = |e: &dyn Display| FileError::WriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut staged = tempfile::Builder::new()
        .prefix(".soundpad-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| failed(&e))?;

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::new(BufWriter::new(staged.as_file_mut()), spec)
        .map_err(|e| failed(&e))?;
    for &sample in samples {
        writer.write_sample(sample).map_err(|e| failed(&e))?;
    }
    writer.finalize().map_err(|e| failed(&e))?;

    debug!("Moving {} into place", staged.path().display());
    staged.persist(path).map_err(|e| failed(&e.error))?;
    Ok(())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn expected_frames(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    (frames as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize
}

fn deinterleave(input: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = input.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in input.chunks_exact(channels) {
        for (ch, &sample) in planar.iter_mut().zip(frame) {
            ch.push(sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for ch in planar {
            out.push(ch[i]);
        }
    }
    out
}

fn append(output: &mut [Vec<f32>], resampled: &[Vec<f32>]) {
    for (dst, src) in output.iter_mut().zip(resampled) {
        dst.extend_from_slice(src);
    }
}
