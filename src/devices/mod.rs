//! Devices module
//!
//! Audio device and MIDI port catalogs, name-to-device resolution, and the
//! backend interface that the stream manager opens streams through.

pub mod backend;
pub mod catalog;
pub mod resolver;

pub use backend::{
    AudioBackend, AudioStream, BackendFactory, ChannelRouting, DriverType, StreamConfiguration,
    StreamRequest,
};
pub use catalog::{
    display_name, AudioCatalog, AudioDeviceDescriptor, DeviceId, MidiCatalog, MidiPortDescriptor,
    PortLayout,
};
pub use resolver::{
    midi_port_number, resolve_audio_device, resolve_midi_port, resolve_stream_devices,
    DeviceResolution, PortSelection,
};

/// Direction of an audio device or MIDI port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}
