//! # soundpad-audio
//!
//! Low-latency soundboard engine for Soundpad.
//!
//! Features:
//! - Mix bus fed through a command queue, so the device callback never waits
//!   on the control plane
//! - symphonia-based decoding and rubato-based offline resampling
//! - cpal output, with the ASIO host behind the `asio` feature

pub mod clip;
pub mod config;
pub mod decode;
pub mod driver;
pub mod engine;
pub mod mixer;
pub mod notify;
pub mod output;
pub mod resample;

pub use clip::Clip;
pub use config::EngineConfig;
pub use driver::{AudioDriver, OutputDevice, StreamRequest};
pub use engine::SoundboardEngine;
pub use notify::{Notifier, SubscriptionToken};
pub use output::CpalDriver;
