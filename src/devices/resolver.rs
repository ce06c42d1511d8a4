//! Name-to-device resolution.
//!
//! Persisted names are matched against a fresh catalog each time a stream is
//! opened or a MIDI port is selected. Matching is exact and case-sensitive.

use super::catalog::{AudioCatalog, DeviceId, MidiCatalog};
use super::Direction;
use crate::error::HostError;
use crate::persistence::{AudioSettings, OFF_TEXT};

/// Find an audio device by display name.
pub fn resolve_audio_device(catalog: &AudioCatalog, name: &str) -> Option<DeviceId> {
    catalog
        .devices()
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.id)
}

/// A resolved MIDI port choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelection {
    /// No port.
    Off,
    /// The platform's virtual port.
    Virtual,
    /// A hardware port, by driver index.
    Hardware(usize),
}

impl PortSelection {
    /// Ordinal of this choice in the catalog's port list.
    pub fn ordinal(self, catalog: &MidiCatalog, direction: Direction) -> usize {
        match self {
            PortSelection::Off => 0,
            PortSelection::Virtual => 1,
            PortSelection::Hardware(index) => index + catalog.layout().hardware_offset(direction),
        }
    }
}

/// Resolve a persisted MIDI port name.
///
/// Returns `None` when the name matches neither a sentinel nor a hardware port.
pub fn resolve_midi_port(
    catalog: &MidiCatalog,
    direction: Direction,
    name: &str,
) -> Option<PortSelection> {
    if name == OFF_TEXT {
        return Some(PortSelection::Off);
    }
    if catalog.layout().virtual_name(direction) == Some(name) {
        return Some(PortSelection::Virtual);
    }
    catalog
        .hardware_names(direction)
        .iter()
        .position(|port| port == name)
        .map(PortSelection::Hardware)
}

/// Port number of a persisted MIDI port name, `-1` when not found.
pub fn midi_port_number(catalog: &MidiCatalog, direction: Direction, name: &str) -> i32 {
    resolve_midi_port(catalog, direction, name)
        .map(|selection| selection.ordinal(catalog, direction) as i32)
        .unwrap_or(-1)
}

/// Outcome of resolving both stream directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResolution {
    /// Resolved input device.
    pub input: Option<DeviceId>,
    /// Resolved output device.
    pub output: Option<DeviceId>,
    /// Whether a persisted name was replaced by the platform default.
    pub reset_to_default: bool,
    missing: Vec<(Direction, String)>,
}

impl DeviceResolution {
    /// Both device identifiers, or the first direction that failed.
    pub fn ids(&self) -> Result<(DeviceId, DeviceId), HostError> {
        if let Some((direction, name)) = self.missing.first() {
            return Err(HostError::DeviceNotFound {
                direction: *direction,
                name: name.clone(),
            });
        }
        match (self.input, self.output) {
            (Some(input), Some(output)) => Ok((input, output)),
            _ => Err(HostError::DeviceNotFound {
                direction: Direction::Output,
                name: String::new(),
            }),
        }
    }
}

/// Resolve the input and output device names in `settings`.
///
/// A name missing from the catalog falls back to the platform default for
/// that direction and the corrected name is written into `settings`. With no
/// default the direction stays unresolved and `settings` is left alone.
/// `shares_duplex_device` resolves the input from the output name, for drivers
/// that expose one device for both directions.
pub fn resolve_stream_devices(
    settings: &mut AudioSettings,
    catalog: &AudioCatalog,
    shares_duplex_device: bool,
) -> DeviceResolution {
    let input_name = if shares_duplex_device {
        settings.output_device.clone()
    } else {
        settings.input_device.clone()
    };

    let mut resolution = DeviceResolution {
        input: resolve_audio_device(catalog, &input_name),
        output: resolve_audio_device(catalog, &settings.output_device),
        reset_to_default: false,
        missing: Vec::new(),
    };

    if resolution.input.is_none() {
        match catalog.default_device(Direction::Input) {
            Some(device) => {
                resolution.input = Some(device.id);
                resolution.reset_to_default = true;
                settings.input_device = device.name.clone();
            }
            None => resolution.missing.push((Direction::Input, input_name)),
        }
    }

    if resolution.output.is_none() {
        match catalog.default_device(Direction::Output) {
            Some(device) => {
                resolution.output = Some(device.id);
                resolution.reset_to_default = true;
                settings.output_device = device.name.clone();
            }
            None => resolution
                .missing
                .push((Direction::Output, settings.output_device.clone())),
        }
    }

    resolution
}
