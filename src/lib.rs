//! Standalone Host Library
//!
//! Runs a fixed-block audio engine as a standalone application: persisted
//! device settings, device and MIDI port resolution, the audio stream
//! lifecycle, and the real-time audio and MIDI paths into the engine.

pub mod devices;
pub mod engine;
pub mod error;
pub mod host;
pub mod persistence;

pub use error::HostError;
pub use host::{AppHost, HostConfig, UiHost};
