//! Audio backend interface.
//!
//! A backend is one audio driver API (a cpal host in practice). It enumerates
//! devices and opens streams that call into a [`CallbackBridge`]. Changing the
//! driver type means building a new backend through a [`BackendFactory`];
//! an existing backend is never re-pointed at another driver.

use super::catalog::{AudioCatalog, DeviceId};
use crate::engine::CallbackBridge;
use crate::error::HostError;
use crate::persistence::AudioSettings;

/// Persisted driver-type code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DriverType(pub u32);

impl From<u32> for DriverType {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

/// Resolved parameters of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub input_device: DeviceId,
    pub output_device: DeviceId,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Requested buffer size in frames. The driver may pick another.
    pub buffer_size: u32,
}

/// Hardware channel (0-based) for each engine channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRouting {
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl ChannelRouting {
    /// Route engine channels 0 and 1 to the 1-based channels in `settings`.
    ///
    /// Engine channels past the second map to the same-numbered hardware
    /// channel.
    pub fn from_settings(settings: &AudioSettings, engine_inputs: usize, engine_outputs: usize) -> Self {
        let route = |count: usize, left: u32, right: u32| {
            (0..count)
                .map(|channel| match channel {
                    0 => left.saturating_sub(1) as usize,
                    1 => right.saturating_sub(1) as usize,
                    other => other,
                })
                .collect()
        };

        Self {
            inputs: route(engine_inputs, settings.input_left, settings.input_right),
            outputs: route(engine_outputs, settings.output_left, settings.output_right),
        }
    }

    /// Number of engine input channels.
    pub fn engine_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of engine output channels.
    pub fn engine_outputs(&self) -> usize {
        self.outputs.len()
    }
}

/// Everything a backend needs to open a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub config: StreamConfiguration,
    pub routing: ChannelRouting,
}

/// One audio driver API.
pub trait AudioBackend {
    /// The driver type this backend was built for.
    fn driver(&self) -> DriverType;

    /// Enumerate devices. Identifiers in the returned catalog are valid for
    /// [`AudioBackend::open_stream`] until the next probe.
    fn probe(&mut self) -> Result<AudioCatalog, HostError>;

    /// Whether input and output are always the same device for this driver.
    fn shares_duplex_device(&self) -> bool {
        false
    }

    /// Open (but do not start) a stream that renders through `bridge`.
    fn open_stream(
        &mut self,
        request: &StreamRequest,
        bridge: CallbackBridge,
    ) -> Result<Box<dyn AudioStream>, HostError>;
}

/// A live stream handle owned by the stream manager.
pub trait AudioStream {
    /// Start delivering callbacks.
    fn start(&mut self) -> Result<(), HostError>;

    /// Stop callbacks immediately and release the device.
    fn abort(&mut self);

    /// Buffer size requested from the driver, in frames. The size actually
    /// delivered is reported through the stream's flags.
    fn buffer_size(&self) -> u32;
}

/// Builds a backend for a driver type.
pub type BackendFactory = Box<dyn Fn(DriverType) -> Result<Box<dyn AudioBackend>, HostError>>;
