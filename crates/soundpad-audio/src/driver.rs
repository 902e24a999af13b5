//! Boundary between the engine and the native audio driver layer.

use std::sync::Arc;

use soundpad_core::{DeviceError, OutputFormat};

/// Render callback handed to a device: fills interleaved stereo f32 frames.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Called from the driver's thread when a running stream faults.
pub type FaultFn = Arc<dyn Fn(DeviceError) + Send + Sync + 'static>;

/// What the engine asks of a device when starting playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub format: OutputFormat,
    /// Fixed buffer size in frames, or `None` for the driver's default.
    pub buffer_frames: Option<u32>,
}

/// Enumerates and opens output devices.
pub trait AudioDriver: Send + Sync {
    type Device: OutputDevice;

    /// Names of every output device currently exposed. Not cached.
    fn device_names(&self) -> Result<Vec<String>, DeviceError>;

    /// Claim the named device. Dropping the returned handle releases it.
    fn open(&self, name: &str) -> Result<Self::Device, DeviceError>;
}

/// An opened, exclusively held output device.
///
/// Dropping the handle stops any running stream and releases the device;
/// once `drop` returns the render callback is never invoked again.
pub trait OutputDevice: Send {
    fn name(&self) -> &str;

    fn supports_rate(&self, rate: u32) -> bool;

    /// Start pulling frames from `render` on the driver's real-time thread.
    fn start(
        &mut self,
        request: StreamRequest,
        render: RenderFn,
        on_fault: FaultFn,
    ) -> Result<(), DeviceError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory driver that records handle lifetimes and lets tests pull
    //! frames through the captured render callback.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    pub(crate) struct FakeDriver {
        inner: Arc<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        devices: Mutex<Vec<(String, Vec<u32>)>>,
        open_handles: AtomicUsize,
        render: Mutex<Option<RenderFn>>,
        fault: Mutex<Option<FaultFn>>,
        fail_start: Mutex<Option<String>>,
    }

    impl FakeDriver {
        pub(crate) fn with_device(self, name: &str, rates: &[u32]) -> Self {
            self.inner
                .devices
                .lock()
                .push((name.to_string(), rates.to_vec()));
            self
        }

        pub(crate) fn fail_next_start(&self, message: &str) {
            *self.inner.fail_start.lock() = Some(message.to_string());
        }

        pub(crate) fn open_handles(&self) -> usize {
            self.inner.open_handles.load(Ordering::SeqCst)
        }

        pub(crate) fn is_streaming(&self) -> bool {
            self.inner.render.lock().is_some()
        }

        /// Pull `frames` stereo frames through the running stream.
        pub(crate) fn render(&self, frames: usize) -> Vec<f32> {
            let mut out = vec![0.0; frames * 2];
            if let Some(render) = self.inner.render.lock().as_mut() {
                render(&mut out);
            }
            out
        }

        /// Simulate an asynchronous stream fault.
        pub(crate) fn fault(&self, message: &str) {
            let fault = self.inner.fault.lock().clone();
            if let Some(fault) = fault {
                fault(DeviceError::Driver {
                    device: "fake".to_string(),
                    message: message.to_string(),
                });
            }
        }
    }

    impl AudioDriver for FakeDriver {
        type Device = FakeDevice;

        fn device_names(&self) -> Result<Vec<String>, DeviceError> {
            Ok(self
                .inner
                .devices
                .lock()
                .iter()
                .map(|(name, _)| name.clone())
                .collect())
        }

        fn open(&self, name: &str) -> Result<FakeDevice, DeviceError> {
            let rates = self
                .inner
                .devices
                .lock()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, rates)| rates.clone())
                .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?;

            // Exclusive, like an ASIO device: one handle at a time.
            if self
                .inner
                .open_handles
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(DeviceError::Driver {
                    device: name.to_string(),
                    message: "device is in use".to_string(),
                });
            }
            Ok(FakeDevice {
                name: name.to_string(),
                rates,
                inner: self.inner.clone(),
            })
        }
    }

    pub(crate) struct FakeDevice {
        name: String,
        rates: Vec<u32>,
        inner: Arc<Inner>,
    }

    impl OutputDevice for FakeDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports_rate(&self, rate: u32) -> bool {
            self.rates.contains(&rate)
        }

        fn start(
            &mut self,
            _request: StreamRequest,
            render: RenderFn,
            on_fault: FaultFn,
        ) -> Result<(), DeviceError> {
            if let Some(message) = self.inner.fail_start.lock().take() {
                return Err(DeviceError::Driver {
                    device: self.name.clone(),
                    message,
                });
            }
            *self.inner.render.lock() = Some(render);
            *self.inner.fault.lock() = Some(on_fault);
            Ok(())
        }
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            *self.inner.render.lock() = None;
            *self.inner.fault.lock() = None;
            self.inner.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
