//! Audio output using cpal.
//!
//! With the `asio` feature on Windows the ASIO host is used; everywhere else
//! the platform default host.

use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, Host, HostId, SampleFormat, SampleRate, Stream, StreamConfig,
    SupportedStreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use soundpad_core::DeviceError;
use tracing::{debug, error, info};

use crate::driver::{AudioDriver, FaultFn, OutputDevice, RenderFn, StreamRequest};

/// Block size the render scratch is sized for when the driver picks its own.
const DEFAULT_BLOCK_FRAMES: usize = 4096;

/// Driver backed by a cpal host.
#[derive(Debug, Clone, Copy)]
pub struct CpalDriver {
    host_id: HostId,
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDriver {
    pub fn new() -> Self {
        Self {
            host_id: preferred_host(),
        }
    }

    pub fn host_name(&self) -> &'static str {
        self.host_id.name()
    }

    fn host(&self) -> Result<Host, DeviceError> {
        cpal::host_from_id(self.host_id).map_err(|e| DeviceError::Driver {
            device: self.host_name().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(all(windows, feature = "asio"))]
fn preferred_host() -> HostId {
    HostId::Asio
}

#[cfg(not(all(windows, feature = "asio")))]
fn preferred_host() -> HostId {
    cpal::default_host().id()
}

impl AudioDriver for CpalDriver {
    type Device = CpalDevice;

    fn device_names(&self) -> Result<Vec<String>, DeviceError> {
        let host = self.host()?;
        let devices = host.output_devices().map_err(|e| DeviceError::Driver {
            device: self.host_name().to_string(),
            message: format!("Failed to list devices: {e}"),
        })?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn open(&self, name: &str) -> Result<CpalDevice, DeviceError> {
        let host = self.host()?;
        let device = host
            .output_devices()
            .map_err(|e| DeviceError::Driver {
                device: name.to_string(),
                message: format!("Failed to list devices: {e}"),
            })?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?;

        info!("Opened output device {name} on {}", self.host_name());
        Ok(CpalDevice {
            device,
            name: name.to_string(),
            worker: None,
        })
    }
}

/// Thread that owns the cpal stream, which is not `Send`.
struct StreamWorker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// An opened cpal output device.
pub struct CpalDevice {
    device: Device,
    name: String,
    worker: Option<StreamWorker>,
}

impl CpalDevice {
    fn driver_error(&self, message: impl Into<String>) -> DeviceError {
        DeviceError::Driver {
            device: self.name.clone(),
            message: message.into(),
        }
    }

    /// Pick a supported config at `rate`, preferring stereo-capable f32.
    fn select_config(&self, rate: u32) -> Result<SupportedStreamConfig, DeviceError> {
        let ranges = self
            .device
            .supported_output_configs()
            .map_err(|e| self.driver_error(format!("Failed to query configs: {e}")))?;

        ranges
            .filter(|c| c.min_sample_rate().0 <= rate && rate <= c.max_sample_rate().0)
            .max_by_key(|c| (c.channels() >= 2, c.sample_format() == SampleFormat::F32))
            .map(|c| c.with_sample_rate(SampleRate(rate)))
            .ok_or_else(|| DeviceError::RateNotSupported {
                device: self.name.clone(),
                rate,
            })
    }
}

impl OutputDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_rate(&self, rate: u32) -> bool {
        self.device.supported_output_configs().is_ok_and(|mut ranges| {
            ranges.any(|c| c.min_sample_rate().0 <= rate && rate <= c.max_sample_rate().0)
        })
    }

    fn start(
        &mut self,
        request: StreamRequest,
        render: RenderFn,
        on_fault: FaultFn,
    ) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Err(self.driver_error("stream already started"));
        }

        let supported = self.select_config(request.format.sample_rate)?;
        let sample_format = supported.sample_format();
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(request.format.sample_rate),
            buffer_size: request
                .buffer_frames
                .map_or(BufferSize::Default, BufferSize::Fixed),
        };
        debug!("Output config for {}: {config:?} {sample_format:?}", self.name);

        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let device = self.device.clone();
        let name = self.name.clone();
        let block_frames = request
            .buffer_frames
            .map_or(DEFAULT_BLOCK_FRAMES, |n| n as usize);

        let thread = std::thread::Builder::new()
            .name("soundpad-output".to_string())
            .spawn(move || {
                let built = match sample_format {
                    SampleFormat::F32 => build_stream::<f32>(
                        &device, &config, &name, block_frames, render, on_fault,
                    ),
                    SampleFormat::I16 => build_stream::<i16>(
                        &device, &config, &name, block_frames, render, on_fault,
                    ),
                    SampleFormat::U16 => build_stream::<u16>(
                        &device, &config, &name, block_frames, render, on_fault,
                    ),
                    SampleFormat::I32 => build_stream::<i32>(
                        &device, &config, &name, block_frames, render, on_fault,
                    ),
                    other => Err(DeviceError::Driver {
                        device: name.clone(),
                        message: format!("Unsupported sample format: {other:?}"),
                    }),
                };

                let stream = match built.and_then(|stream| {
                    stream.play().map_err(|e| DeviceError::Driver {
                        device: name.clone(),
                        message: format!("Failed to start stream: {e}"),
                    })?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));
                // Parked until the device handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Output stream on {name} closed");
            })
            .map_err(|e| self.driver_error(format!("Failed to spawn output thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(StreamWorker {
                    stop: stop_tx,
                    thread,
                });
                info!(
                    "Output stream running on {} at {} Hz",
                    self.name, request.format.sample_rate
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(self.driver_error("output thread exited during start-up"))
            }
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if worker.thread.join().is_err() {
                error!("Output thread for {} panicked", self.name);
            }
        }
        info!("Released output device {}", self.name);
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    name: &str,
    block_frames: usize,
    mut render: RenderFn,
    on_fault: FaultFn,
) -> Result<Stream, DeviceError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = usize::from(config.channels);
    let mut mix = vec![0.0f32; block_frames * 2];
    let device_name = name.to_string();

    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error on {device_name}: {err}");
        on_fault(DeviceError::Driver {
            device: device_name.clone(),
            message: err.to_string(),
        });
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let needed = data.len() / channels * 2;
                if mix.len() < needed {
                    mix.resize(needed, 0.0);
                }
                let block = &mut mix[..needed];
                render(block);
                write_frames(data, channels, block);
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Driver {
            device: name.to_string(),
            message: format!("Failed to build stream: {e}"),
        })
}

/// Map interleaved stereo into the device's channel layout.
///
/// Mono devices get the average; channels past the second are silent.
fn write_frames<T>(data: &mut [T], channels: usize, stereo: &[f32])
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    for (out, src) in data.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
        if channels == 1 {
            out[0] = T::from_sample((src[0] + src[1]) * 0.5);
            continue;
        }
        out[0] = T::from_sample(src[0]);
        out[1] = T::from_sample(src[1]);
        for extra in &mut out[2..] {
            *extra = T::from_sample(0.0f32);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;

    #[test]
    fn test_list_devices() {
        // May fail on CI without audio hardware; it must not panic.
        let _ = CpalDriver::new().device_names();
    }

    #[test]
    fn test_unknown_device() {
        let driver = CpalDriver::new();
        if let Err(err) = driver.open("soundpad-test-no-such-device") {
            assert!(matches!(
                err,
                DeviceError::DeviceNotFound(_) | DeviceError::Driver { .. }
            ));
        }
    }

    #[test]
    fn test_write_frames_stereo_to_quad() {
        let mut data = [9.0f32; 8];
        write_frames(&mut data, 4, &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(data, [0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_write_frames_downmix_to_mono() {
        let mut data = [0.0f32; 2];
        write_frames(&mut data, 1, &[0.2, 0.4, -1.0, 1.0]);
        assert!((data[0] - 0.3).abs() < 1e-6);
        assert_eq!(data[1], 0.0);
    }

    #[test]
    fn test_write_frames_to_i16() {
        let mut data = [0i16; 2];
        write_frames(&mut data, 2, &[0.0, 0.5]);
        assert_eq!(data, [0, 16384]);
    }
}
