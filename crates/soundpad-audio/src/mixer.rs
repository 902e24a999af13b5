//! Mix bus: the live set of clips summed into one stereo stream.
//!
//! The bus itself is owned by the render side (the device callback). The
//! control plane talks to it through a [`MixController`], which pushes
//! commands onto a fixed-size ring that the renderer drains at the start of
//! every block. The render path never waits on a lock held by the control
//! plane, and never allocates or frees: voices and scratch are sized up
//! front, and finished clips are handed to a reaper thread for release.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use soundpad_core::{Error, OutputFormat, PlaybackError, Result};
use tracing::trace;

use crate::clip::Clip;

/// Samples of per-voice read buffer. Larger blocks are rendered in chunks.
const SCRATCH_SAMPLES: usize = 8192;

/// Commands pending beyond the voice limit (clears, gain changes).
const COMMAND_HEADROOM: usize = 256;

/// Commands from the control plane to the render side.
#[derive(Debug)]
pub enum MixCommand {
    Add(Box<Clip>),
    Clear,
    SetMasterGain(f32),
}

/// Sum of every active clip at a fixed output format.
pub struct MixBus {
    format: OutputFormat,
    voices: Vec<Box<Clip>>,
    scratch: Vec<f32>,
    master_gain: f32,
    retired: Option<Sender<Box<Clip>>>,
    /// Clips the retire queue had no room for, sent on a later block.
    backlog: Vec<Box<Clip>>,
}

impl MixBus {
    /// Create an empty bus with room for `capacity` voices.
    pub fn new(format: OutputFormat, capacity: usize) -> Self {
        Self {
            format,
            voices: Vec::with_capacity(capacity),
            scratch: vec![0.0; SCRATCH_SAMPLES],
            master_gain: 1.0,
            retired: None,
            backlog: Vec::new(),
        }
    }

    /// Hand removed clips to `tx` instead of dropping them in place.
    #[must_use]
    pub fn with_retire_queue(mut self, tx: Sender<Box<Clip>>) -> Self {
        self.retired = Some(tx);
        self.backlog = Vec::with_capacity(self.voices.capacity());
        self
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain;
    }

    /// Admit a clip. Its rate must already match the bus rate.
    ///
    /// A clip that would grow the voice list past its capacity is retired
    /// unplayed.
    pub fn add(&mut self, clip: Box<Clip>) {
        debug_assert_eq!(
            clip.sample_rate(),
            self.format.sample_rate,
            "clip admitted at the wrong sample rate"
        );
        if self.voices.len() == self.voices.capacity()
            || usize::from(clip.channels()) > self.scratch.len()
        {
            self.retire(clip);
            return;
        }
        self.voices.push(clip);
    }

    /// Remove every clip.
    pub fn clear(&mut self) {
        while let Some(clip) = self.voices.pop() {
            self.retire(clip);
        }
    }

    /// Render `out.len() / 2` stereo frames, dropping clips that run out.
    pub fn pull(&mut self, out: &mut [f32]) {
        self.flush_backlog();

        out.fill(0.0);
        let out_channels = usize::from(self.format.channels());
        let frames = out.len() / out_channels;

        let mut i = 0;
        while i < self.voices.len() {
            let voice = &mut self.voices[i];
            let channels = usize::from(voice.channels());
            let chunk = self.scratch.len() / channels;

            let mut done = 0;
            while done < frames {
                let want = chunk.min(frames - done);
                let read = voice.read(&mut self.scratch[..want * channels]);
                mix_into(
                    &mut out[done * out_channels..],
                    &self.scratch[..read * channels],
                    channels,
                );
                done += read;
                if read < want {
                    break;
                }
            }

            if done < frames {
                let finished = self.voices.swap_remove(i);
                self.retire(finished);
            } else {
                i += 1;
            }
        }

        if self.master_gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= self.master_gain;
            }
        }
    }

    fn retire(&mut self, clip: Box<Clip>) {
        let Some(tx) = &self.retired else {
            return;
        };
        if let Err(TrySendError::Full(clip)) = tx.try_send(clip) {
            if self.backlog.len() < self.backlog.capacity() {
                self.backlog.push(clip);
            }
            // Otherwise the reaper has stalled and the clip is freed here.
        }
    }

    fn flush_backlog(&mut self) {
        let Some(tx) = &self.retired else {
            return;
        };
        while let Some(clip) = self.backlog.pop() {
            if let Err(TrySendError::Full(clip)) = tx.try_send(clip) {
                self.backlog.push(clip);
                break;
            }
        }
    }
}

/// Add interleaved `src` with `channels` channels into stereo `out`.
fn mix_into(out: &mut [f32], src: &[f32], channels: usize) {
    match channels {
        1 => {
            for (frame, &s) in out.chunks_exact_mut(2).zip(src) {
                frame[0] += s;
                frame[1] += s;
            }
        }
        _ => {
            for (frame, src) in out.chunks_exact_mut(2).zip(src.chunks_exact(channels)) {
                frame[0] += src[0];
                frame[1] += src[1];
            }
        }
    }
}

/// Render side of a bus: owns the [`MixBus`] and applies queued commands.
pub struct MixRenderer {
    bus: MixBus,
    commands: rtrb::Consumer<MixCommand>,
    active: Arc<AtomicUsize>,
    /// Voices admitted by the controller and not yet released here.
    slots: Arc<AtomicUsize>,
}

impl MixRenderer {
    /// Apply pending commands, then render one block into `out`.
    pub fn render(&mut self, out: &mut [f32]) {
        let before = self.bus.len();
        let mut added = 0;
        while let Ok(command) = self.commands.pop() {
            match command {
                MixCommand::Add(clip) => {
                    self.bus.add(clip);
                    added += 1;
                }
                MixCommand::Clear => self.bus.clear(),
                MixCommand::SetMasterGain(gain) => self.bus.set_master_gain(gain),
            }
        }

        self.bus.pull(out);

        let playing = self.bus.len();
        self.active.store(playing, Ordering::Release);
        self.slots.fetch_sub(before + added - playing, Ordering::AcqRel);
    }
}

/// Control side of a bus.
pub struct MixController {
    commands: rtrb::Producer<MixCommand>,
    active: Arc<AtomicUsize>,
    slots: Arc<AtomicUsize>,
    capacity: usize,
}

impl MixController {
    /// Queue a clip for admission.
    ///
    /// Fails with [`PlaybackError::TooManySounds`] once the voice limit is
    /// reached, counting clips still waiting for the next block.
    pub fn add(&mut self, clip: Clip) -> Result<()> {
        let capacity = self.capacity;
        let reserved = self
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(PlaybackError::TooManySounds { limit: capacity }.into());
        }

        let result = self.send(MixCommand::Add(Box::new(clip)));
        if result.is_err() {
            self.slots.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }

    /// Queue removal of every clip.
    pub fn clear(&mut self) -> Result<()> {
        self.send(MixCommand::Clear)
    }

    pub fn set_master_gain(&mut self, gain: f32) -> Result<()> {
        self.send(MixCommand::SetMasterGain(gain))
    }

    /// Clips active as of the last rendered block.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn send(&mut self, command: MixCommand) -> Result<()> {
        if self.commands.is_abandoned() {
            return Err(Error::Internal("mix bus renderer is gone".to_string()));
        }
        self.commands
            .push(command)
            .map_err(|_| Error::Internal("mix bus command queue is full".to_string()))
    }
}

/// Release retired clips off the render thread. The thread exits once the
/// renderer (the only sender) is dropped, returning how many it released.
fn spawn_reaper(retired: Receiver<Box<Clip>>) -> std::io::Result<JoinHandle<usize>> {
    thread::Builder::new()
        .name("soundpad-reaper".to_string())
        .spawn(move || {
            let released = retired.iter().count();
            trace!("Mix bus reaper released {released} clips");
            released
        })
}

/// Create a connected controller/renderer pair for a new bus.
pub fn mix_bus(
    format: OutputFormat,
    voice_capacity: usize,
    retire_capacity: usize,
    master_gain: f32,
) -> Result<(MixController, MixRenderer)> {
    let (command_tx, command_rx) = rtrb::RingBuffer::new(voice_capacity + COMMAND_HEADROOM);
    let (retire_tx, retire_rx) = bounded(retire_capacity.max(1));
    let active = Arc::new(AtomicUsize::new(0));
    let slots = Arc::new(AtomicUsize::new(0));

    // Detached: it ends with the renderer.
    spawn_reaper(retire_rx)?;

    let mut bus = MixBus::new(format, voice_capacity).with_retire_queue(retire_tx);
    bus.set_master_gain(master_gain);

    let controller = MixController {
        commands: command_tx,
        active: active.clone(),
        slots: slots.clone(),
        capacity: voice_capacity,
    };
    let renderer = MixRenderer {
        bus,
        commands: command_rx,
        active,
        slots,
    };

    Ok((controller, renderer))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::float_cmp)]

    use super::*;

    const RATE: u32 = 48000;

    fn tone(frames: usize, value: f32) -> Box<Clip> {
        Box::new(Clip::from_samples("tone", RATE, 2, vec![value; frames * 2]))
    }

    #[test]
    fn test_sums_sources() {
        let mut bus = MixBus::new(OutputFormat::new(RATE), 4);
        bus.add(tone(64, 0.25));
        bus.add(tone(64, 0.5));

        let mut out = [0.0f32; 32];
        bus.pull(&mut out);
        assert!(out.iter().all(|&s| s == 0.75));
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn test_mono_is_spread_to_both_channels() {
        let mut bus = MixBus::new(OutputFormat::new(RATE), 1);
        bus.add(Box::new(Clip::from_samples("mono", RATE, 1, vec![0.3; 8])));

        let mut out = [0.0f32; 16];
        bus.pull(&mut out);
        assert!(out.iter().all(|&s| s == 0.3));
    }

    #[test]
    fn test_exhausted_source_is_removed() {
        let mut bus = MixBus::new(OutputFormat::new(RATE), 4);
        bus.add(tone(100, 0.5));
        bus.add(tone(1000, 0.25));

        let mut out = [0.0f32; 128];
        bus.pull(&mut out);
        assert_eq!(bus.len(), 2);

        // Second block: the short tone runs out after 36 frames.
        bus.pull(&mut out);
        assert_eq!(bus.len(), 1);
        assert_eq!(out[0], 0.75);
        assert_eq!(out[127], 0.25);

        bus.pull(&mut out);
        assert!(out.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_clear_silences_everything() {
        let mut bus = MixBus::new(OutputFormat::new(RATE), 4);
        for _ in 0..3 {
            bus.add(tone(1000, 0.1));
        }
        bus.clear();
        assert!(bus.is_empty());

        let mut out = [1.0f32; 64];
        bus.pull(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_master_gain_applies_to_mix() {
        let mut bus = MixBus::new(OutputFormat::new(RATE), 1);
        bus.set_master_gain(0.5);
        bus.add(tone(16, 0.8));

        let mut out = [0.0f32; 8];
        bus.pull(&mut out);
        assert!(out.iter().all(|&s| s == 0.4));
    }

    #[test]
    fn test_voice_list_never_grows() {
        let mut bus = MixBus::new(OutputFormat::new(RATE), 2);
        let capacity = bus.voices.capacity();
        for _ in 0..capacity + 3 {
            bus.add(tone(1000, 0.1));
        }
        assert_eq!(bus.len(), capacity);
        assert_eq!(bus.voices.capacity(), capacity);
    }

    #[test]
    fn test_large_blocks_render_in_chunks() {
        let mut bus = MixBus::new(OutputFormat::new(RATE), 2);
        bus.add(tone(10_000, 0.5));
        bus.add(Box::new(Clip::from_samples("mono", RATE, 1, vec![0.25; 10_000])));

        // 6000 stereo frames need two passes through the scratch buffer.
        let mut out = vec![0.0f32; 12_000];
        bus.pull(&mut out);
        assert!(out.iter().all(|&s| s == 0.75));
        assert_eq!(bus.len(), 2);
        assert_eq!(bus.scratch.len(), SCRATCH_SAMPLES);

        // The rest of both clips ends mid-block.
        bus.pull(&mut out);
        assert_eq!(out[7999], 0.75);
        assert_eq!(out[8000], 0.0);
        assert!(bus.is_empty());
        assert_eq!(bus.scratch.len(), SCRATCH_SAMPLES);
    }

    #[test]
    fn test_full_retire_queue_defers_release() {
        let (tx, rx) = bounded(1);
        let mut bus = MixBus::new(OutputFormat::new(RATE), 4).with_retire_queue(tx);
        for _ in 0..3 {
            bus.add(tone(1000, 0.1));
        }

        bus.clear();
        assert_eq!(rx.len(), 1);
        assert_eq!(bus.backlog.len(), 2);

        let mut out = [0.0f32; 16];
        rx.try_recv().unwrap();
        bus.pull(&mut out);
        assert_eq!(bus.backlog.len(), 1);

        rx.try_recv().unwrap();
        bus.pull(&mut out);
        assert!(bus.backlog.is_empty());
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_reaper_releases_until_renderer_is_gone() {
        let (tx, rx) = bounded(4);
        let reaper = spawn_reaper(rx).unwrap();
        for _ in 0..3 {
            tx.send(tone(10, 0.1)).unwrap();
        }
        drop(tx);
        assert_eq!(reaper.join().unwrap(), 3);
    }

    #[test]
    fn test_controller_and_renderer() {
        let (mut controller, mut renderer) = mix_bus(OutputFormat::new(RATE), 4, 4, 1.0).unwrap();
        controller.add(*tone(10, 0.5)).unwrap();
        controller.add(*tone(1000, 0.5)).unwrap();
        assert_eq!(controller.active(), 0);

        let mut out = [0.0f32; 64];
        renderer.render(&mut out);
        assert_eq!(controller.active(), 1);

        controller.clear().unwrap();
        renderer.render(&mut out);
        assert_eq!(controller.active(), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_voice_limit_counts_queued_clips() {
        let (mut controller, mut renderer) = mix_bus(OutputFormat::new(RATE), 2, 4, 1.0).unwrap();
        controller.add(*tone(10, 0.5)).unwrap();
        controller.add(*tone(1000, 0.5)).unwrap();

        // Nothing has rendered yet, but both slots are taken.
        let err = controller.add(*tone(1000, 0.5)).unwrap_err();
        assert!(matches!(
            err,
            Error::Playback(PlaybackError::TooManySounds { limit: 2 })
        ));

        // The short tone finishes in the first block and frees its slot.
        let mut out = [0.0f32; 64];
        renderer.render(&mut out);
        controller.add(*tone(1000, 0.5)).unwrap();
        assert!(controller.add(*tone(1000, 0.5)).is_err());

        controller.clear().unwrap();
        renderer.render(&mut out);
        controller.add(*tone(1000, 0.5)).unwrap();
        controller.add(*tone(1000, 0.5)).unwrap();
    }

    #[test]
    fn test_controller_reports_missing_renderer() {
        let (mut controller, renderer) = mix_bus(OutputFormat::new(RATE), 1, 1, 1.0).unwrap();
        drop(renderer);
        assert!(controller.set_master_gain(0.5).is_err());
        assert!(controller.add(*tone(10, 0.5)).is_err());
        assert_eq!(controller.slots.load(Ordering::Acquire), 0);
    }
}
