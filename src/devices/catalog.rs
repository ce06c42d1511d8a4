//! Device and port catalogs.
//!
//! Catalogs are snapshots taken on the control thread each time devices are
//! probed. Device identifiers are only meaningful within the snapshot that
//! produced them; only display names are ever persisted.

use std::collections::HashSet;

use super::Direction;
use crate::persistence::OFF_TEXT;

/// Identifier of an audio device within one catalog snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub usize);

/// Strip the audio host's own qualifier (`"ASIO: Focusrite"` -> `"Focusrite"`).
///
/// Only a prefix equal to `host` followed by `:` is removed. Colons elsewhere
/// are part of the device identity (ALSA's `hw:CARD=PCH,DEV=0`) and are kept.
pub fn display_name<'a>(raw: &'a str, host: &str) -> &'a str {
    let name = raw
        .strip_prefix(host)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(raw)
        .trim();
    if name.is_empty() {
        raw
    } else {
        name
    }
}

/// Suffix repeated names with ` (2)`, ` (3)`, ... so each resolves to one device.
fn make_names_unique(devices: &mut [AudioDeviceDescriptor]) {
    let mut seen = HashSet::new();
    for device in devices.iter_mut() {
        if seen.insert(device.name.clone()) {
            continue;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{} ({})", device.name, n);
            if seen.insert(candidate.clone()) {
                device.name = candidate;
                break;
            }
            n += 1;
        }
    }
}

/// Information about one audio device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceDescriptor {
    /// Identifier within the current catalog.
    pub id: DeviceId,
    /// Display name, qualifier stripped.
    pub name: String,
    /// Maximum number of input channels (0 = output-only).
    pub max_input_channels: u16,
    /// Maximum number of output channels (0 = input-only).
    pub max_output_channels: u16,
    /// Whether this is the platform default input device.
    pub is_default_input: bool,
    /// Whether this is the platform default output device.
    pub is_default_output: bool,
}

/// Result of probing the audio devices of one driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioCatalog {
    devices: Vec<AudioDeviceDescriptor>,
}

impl AudioCatalog {
    /// Create a catalog from enumerated devices.
    ///
    /// Repeated display names are made unique in enumeration order.
    pub fn new(mut devices: Vec<AudioDeviceDescriptor>) -> Self {
        make_names_unique(&mut devices);
        Self { devices }
    }

    /// All devices in enumeration order.
    pub fn devices(&self) -> &[AudioDeviceDescriptor] {
        &self.devices
    }

    /// Devices with at least one input channel.
    pub fn input_devices(&self) -> impl Iterator<Item = &AudioDeviceDescriptor> {
        self.devices.iter().filter(|d| d.max_input_channels > 0)
    }

    /// Devices with at least one output channel.
    pub fn output_devices(&self) -> impl Iterator<Item = &AudioDeviceDescriptor> {
        self.devices.iter().filter(|d| d.max_output_channels > 0)
    }

    /// The platform default device for a direction, if any.
    pub fn default_device(&self, direction: Direction) -> Option<&AudioDeviceDescriptor> {
        self.devices.iter().find(|d| match direction {
            Direction::Input => d.is_default_input,
            Direction::Output => d.is_default_output,
        })
    }

    /// Look up a device by identifier.
    pub fn get(&self, id: DeviceId) -> Option<&AudioDeviceDescriptor> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Number of devices in the catalog.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no devices were found.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Where the synthetic MIDI entries sit in a port list.
///
/// Index 0 is always the "off" entry. Platforms that can create a virtual port
/// put it at index 1, which pushes hardware ports to start at index 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLayout {
    /// Name of the synthetic virtual input entry.
    pub virtual_input: Option<&'static str>,
    /// Name of the synthetic virtual output entry.
    pub virtual_output: Option<&'static str>,
}

impl PortLayout {
    /// Layout with a virtual port in both directions.
    pub const WITH_VIRTUAL: Self = Self {
        virtual_input: Some("virtual input"),
        virtual_output: Some("virtual output"),
    };

    /// Layout with only the "off" sentinel.
    pub const HARDWARE_ONLY: Self = Self {
        virtual_input: None,
        virtual_output: None,
    };

    /// Layout of the platform this crate was built for.
    pub const fn platform() -> Self {
        if cfg!(unix) {
            Self::WITH_VIRTUAL
        } else {
            Self::HARDWARE_ONLY
        }
    }

    /// Name of the virtual entry for a direction, if the platform has one.
    pub fn virtual_name(&self, direction: Direction) -> Option<&'static str> {
        match direction {
            Direction::Input => self.virtual_input,
            Direction::Output => self.virtual_output,
        }
    }

    /// Ordinal of the first hardware port in a direction.
    pub fn hardware_offset(&self, direction: Direction) -> usize {
        if self.virtual_name(direction).is_some() {
            2
        } else {
            1
        }
    }
}

impl Default for PortLayout {
    fn default() -> Self {
        Self::platform()
    }
}

/// One entry of a MIDI port list as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPortDescriptor {
    /// Ordinal within the list, sentinels included.
    pub index: usize,
    /// Display name.
    pub name: String,
    /// Port direction.
    pub direction: Direction,
}

/// Result of probing the MIDI ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MidiCatalog {
    layout: PortLayout,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl MidiCatalog {
    /// Create a catalog from hardware port names, in driver order.
    pub fn new(layout: PortLayout, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            layout,
            inputs,
            outputs,
        }
    }

    /// The sentinel layout this catalog was built with.
    pub fn layout(&self) -> PortLayout {
        self.layout
    }

    /// Hardware port names only, in driver order.
    pub fn hardware_names(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    /// Full port list for a direction, sentinels first.
    pub fn ports(&self, direction: Direction) -> Vec<MidiPortDescriptor> {
        let mut names = vec![OFF_TEXT.to_string()];
        if let Some(name) = self.layout.virtual_name(direction) {
            names.push(name.to_string());
        }
        names.extend(self.hardware_names(direction).iter().cloned());

        names
            .into_iter()
            .enumerate()
            .map(|(index, name)| MidiPortDescriptor {
                index,
                name,
                direction,
            })
            .collect()
    }

    /// Display names of [`MidiCatalog::ports`].
    pub fn port_names(&self, direction: Direction) -> Vec<String> {
        self.ports(direction).into_iter().map(|p| p.name).collect()
    }
}
