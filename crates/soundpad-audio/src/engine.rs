//! Soundboard engine: owns the output device and the mix bus for one session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use soundpad_core::{
    clamp_volume, curve, ActiveSelection, DeviceError, DeviceSelection, EngineEvent, Error,
    OutputFormat, PlaybackError, Result, Setting,
};
use tracing::{debug, error, info, warn};

use crate::clip::Clip;
use crate::config::EngineConfig;
use crate::driver::{AudioDriver, FaultFn, OutputDevice, StreamRequest};
use crate::mixer::{mix_bus, MixController};
use crate::notify::{Notifier, SubscriptionToken};
use crate::output::CpalDriver;
use crate::resample;

/// A running session. Fields drop in order, so the device (and with it the
/// render callback) is gone before the controller side of the bus.
struct Session<H> {
    device: H,
    mixer: MixController,
    selection: ActiveSelection,
    /// User-facing master volume, already clamped.
    volume: f32,
    id: u64,
}

impl<H> Session<H> {
    fn to_selection(&self) -> DeviceSelection {
        DeviceSelection {
            device: Setting::Set(self.selection.device().to_string()),
            sample_rate: Setting::Set(self.selection.format().sample_rate),
            volume: self.volume,
        }
    }
}

/// Engine state. Device and rate can only be edited in `Stopped`; a running
/// session holds an [`ActiveSelection`], which has no setters.
enum EngineState<H> {
    Stopped(DeviceSelection),
    Running(Session<H>),
}

/// Low-latency soundboard engine.
///
/// All methods take `&self` and may be called from any thread. Mutations are
/// serialized by one lock. Status events are queued under that lock and
/// delivered after it is released, so listeners see them in state order and
/// may call back into the engine.
pub struct SoundboardEngine<D: AudioDriver = CpalDriver> {
    driver: D,
    config: EngineConfig,
    state: Mutex<EngineState<D::Device>>,
    notifier: Arc<Notifier>,
    running: AtomicBool,
    next_session: AtomicU64,
}

impl<D: AudioDriver> SoundboardEngine<D> {
    pub fn new(driver: D, config: EngineConfig) -> Self {
        Self {
            driver,
            config,
            state: Mutex::new(EngineState::Stopped(DeviceSelection::default())),
            notifier: Arc::new(Notifier::new()),
            running: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
        }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.notifier.unsubscribe(token)
    }

    /// Lock-free snapshot of the engine state.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Re-publish the current status, e.g. for a listener that just attached.
    pub fn announce_status(&self) {
        {
            let state = self.state.lock();
            self.notifier.enqueue(EngineEvent::EngineStatusChanged {
                active: matches!(*state, EngineState::Running(_)),
            });
        }
        self.notifier.dispatch();
    }

    /// Enumerate the driver's output devices. Not cached.
    pub fn list_devices(&self) -> Result<Vec<String>> {
        self.report(self.driver.device_names().map_err(Error::from))
    }

    /// Current selection, or the frozen one of the running session.
    pub fn selection(&self) -> DeviceSelection {
        match &*self.state.lock() {
            EngineState::Stopped(selection) => selection.clone(),
            EngineState::Running(session) => session.to_selection(),
        }
    }

    pub fn set_device(&self, device: impl Into<String>) -> Result<()> {
        let device = device.into();
        let result = self.with_stopped_selection(|s| s.set_device(device));
        self.report(result)
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<()> {
        let result = self.with_stopped_selection(|s| s.set_sample_rate(rate));
        self.report(result)
    }

    fn with_stopped_selection(&self, edit: impl FnOnce(&mut DeviceSelection)) -> Result<()> {
        match &mut *self.state.lock() {
            EngineState::Stopped(selection) => {
                edit(selection);
                Ok(())
            }
            EngineState::Running(_) => Err(DeviceError::Locked.into()),
        }
    }

    /// Format of the running session's mix bus.
    pub fn output_format(&self) -> Option<OutputFormat> {
        match &*self.state.lock() {
            EngineState::Running(session) => Some(session.selection.format()),
            EngineState::Stopped(_) => None,
        }
    }

    /// Clips playing as of the last rendered block.
    pub fn active_sounds(&self) -> usize {
        match &*self.state.lock() {
            EngineState::Running(session) => session.mixer.active(),
            EngineState::Stopped(_) => 0,
        }
    }

    /// Open the device and start rendering.
    ///
    /// `None` arguments fall back to the stored selection; given values are
    /// stored even if starting fails.
    pub fn start(
        &self,
        device: Option<&str>,
        rate: Option<u32>,
        volume: Option<f32>,
    ) -> Result<()> {
        let result = self.open_session(&mut self.state.lock(), device, rate, volume);
        self.notifier.dispatch();
        self.report(result)
    }

    /// Start a session from `state`. On success the status event is queued
    /// while the caller still holds the state lock.
    fn open_session(
        &self,
        state: &mut EngineState<D::Device>,
        device: Option<&str>,
        rate: Option<u32>,
        volume: Option<f32>,
    ) -> Result<()> {
        let EngineState::Stopped(selection) = state else {
            return Err(DeviceError::AlreadyRunning.into());
        };

        if let Some(device) = device {
            selection.set_device(device);
        }
        if let Some(rate) = rate {
            selection.set_sample_rate(rate);
        }
        if let Some(volume) = volume {
            selection.set_volume(volume);
        }

        let active = selection.resolve()?;
        let format = active.format();
        let master_volume = selection.volume;

        // Dropping `handle` on any early return releases the device.
        let mut handle = self.driver.open(active.device())?;
        if !handle.supports_rate(format.sample_rate) {
            return Err(DeviceError::RateNotSupported {
                device: active.device().to_string(),
                rate: format.sample_rate,
            }
            .into());
        }

        let (mixer, mut renderer) = mix_bus(
            format,
            self.config.voice_capacity,
            self.config.retire_capacity,
            curve(master_volume),
        )?;

        let notifier = self.notifier.clone();
        let on_fault: FaultFn = Arc::new(move |err: DeviceError| {
            error!("Output device fault: {err}");
            notifier.publish(&EngineEvent::from(&err));
        });

        handle.start(
            StreamRequest {
                format,
                buffer_frames: self.config.buffer_frames,
            },
            Box::new(move |out: &mut [f32]| renderer.render(out)),
            on_fault,
        )?;

        info!(
            "Audio engine started on {} at {} Hz",
            active.device(),
            format.sample_rate
        );
        *state = EngineState::Running(Session {
            device: handle,
            mixer,
            selection: active,
            volume: master_volume,
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
        });
        self.running.store(true, Ordering::Release);
        self.notifier
            .enqueue(EngineEvent::EngineStatusChanged { active: true });

        Ok(())
    }

    /// Release the device and discard the mix bus. No-op when stopped.
    pub fn stop(&self) {
        self.close_session(&mut self.state.lock());
        self.notifier.dispatch();
    }

    /// Stop the session held in `state`, if any. The device is released and
    /// the status event queued before the caller drops the state lock, so a
    /// concurrent start cannot race the close.
    fn close_session(&self, state: &mut EngineState<D::Device>) -> bool {
        let EngineState::Running(session) = &*state else {
            return false;
        };

        let selection = session.to_selection();
        let previous = std::mem::replace(state, EngineState::Stopped(selection));
        self.running.store(false, Ordering::Release);
        drop(previous);

        info!("Audio engine stopped");
        self.notifier
            .enqueue(EngineEvent::EngineStatusChanged { active: false });
        true
    }

    /// Stop when running, otherwise start with the stored selection.
    /// Returns whether the engine is running afterwards.
    pub fn toggle(&self) -> Result<bool> {
        let result = {
            let mut state = self.state.lock();
            if self.close_session(&mut state) {
                Ok(false)
            } else {
                self.open_session(&mut state, None, None, None).map(|()| true)
            }
        };
        self.notifier.dispatch();
        self.report(result)
    }

    /// Set the master volume of the running session. No-op when stopped.
    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        let result = match &mut *self.state.lock() {
            EngineState::Running(session) => {
                session.volume = clamp_volume(volume);
                session.mixer.set_master_gain(curve(session.volume))
            }
            EngineState::Stopped(_) => Ok(()),
        };
        self.report(result)
    }

    /// Decode `path` and add it to the mix at `volume`.
    ///
    /// Files whose rate differs from the session rate are refused with
    /// [`PlaybackError::UnsupportedSampleRate`]; call [`Self::resample_file`]
    /// and retry with the returned path.
    pub fn play_file(&self, path: impl AsRef<Path>, volume: f32) -> Result<()> {
        let path = path.as_ref();
        let result = self
            .load_clip(path, volume)
            .and_then(|(session_id, clip)| self.admit(session_id, path, clip));
        self.report(result)
    }

    /// Open and fully decode a clip for the running session, outside the
    /// state lock. Returns the session it was checked against.
    fn load_clip(&self, path: &Path, volume: f32) -> Result<(u64, Clip)> {
        let (session_id, required_rate) = match &*self.state.lock() {
            EngineState::Running(session) => {
                (session.id, session.selection.format().sample_rate)
            }
            EngineState::Stopped(_) => return Err(PlaybackError::EngineStopped.into()),
        };

        let mut clip = Clip::open(path)?;
        if clip.sample_rate() != required_rate {
            return Err(PlaybackError::UnsupportedSampleRate {
                path: path.to_path_buf(),
                required_rate,
                actual_rate: clip.sample_rate(),
            }
            .into());
        }
        clip.preload()?;
        Ok((session_id, clip.with_gain(curve(volume))))
    }

    /// Hand a loaded clip to the mix, unless the session it was loaded for
    /// has ended in the meantime.
    fn admit(&self, session_id: u64, path: &Path, clip: Clip) -> Result<()> {
        match &mut *self.state.lock() {
            EngineState::Running(session) if session.id == session_id => {
                debug!(
                    "Playing {} ({} frames, gain {:.3})",
                    path.display(),
                    clip.buffered_frames(),
                    clip.gain()
                );
                session.mixer.add(clip)
            }
            // Stopped (or restarted) while the file was decoding.
            _ => Err(PlaybackError::EngineStopped.into()),
        }
    }

    /// Silence every playing clip. No-op when stopped.
    pub fn stop_all_sounds(&self) -> Result<()> {
        let result = match &mut *self.state.lock() {
            EngineState::Running(session) => session.mixer.clear(),
            EngineState::Stopped(_) => Ok(()),
        };
        self.report(result)
    }

    /// Convert a file to `target_rate` and write it as WAV beside the
    /// original. Works whether or not the engine is running.
    pub fn resample_file(&self, path: impl AsRef<Path>, target_rate: u32) -> Result<PathBuf> {
        self.report(resample::resample_file(path, target_rate))
    }

    /// Publish the event for a failed operation. Call with no lock held.
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            warn!("{err}");
            if let Some(event) = err.to_event() {
                self.notifier.publish(&event);
            }
        }
        result
    }
}
