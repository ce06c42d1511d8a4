//! MIDI Events
//!
//! Messages that flow from the MIDI driver thread to the engine.
//! All types here are Send + 'static and fixed-size so they can travel
//! through lock-free queues without allocating.

use crate::error::HostError;

/// Largest SysEx message accepted from a MIDI input, in bytes.
pub const MAX_SYSEX_SIZE: usize = 512;

/// A short (1-3 byte) MIDI message. Missing data bytes are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiMessage {
    /// Create a message from its three bytes.
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
        }
    }

    /// Pack 1-3 raw bytes. Returns None for an empty slice or more than 3 bytes.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match *data {
            [status] => Some(Self::new(status, 0, 0)),
            [status, data1] => Some(Self::new(status, data1, 0)),
            [status, data1, data2] => Some(Self::new(status, data1, data2)),
            _ => None,
        }
    }

    /// Whether this is a channel-voice message (status 0x80-0xEF).
    pub fn is_channel_voice(&self) -> bool {
        (0x80..0xF0).contains(&self.status)
    }

    /// Channel (0-15) of a channel-voice message.
    pub fn channel(&self) -> Option<u8> {
        self.is_channel_voice().then_some(self.status & 0x0F)
    }

    /// Copy of this message moved to another channel (0-15).
    /// System messages are returned unchanged.
    pub fn with_channel(self, channel: u8) -> Self {
        if self.is_channel_voice() {
            Self {
                status: (self.status & 0xF0) | (channel & 0x0F),
                ..self
            }
        } else {
            self
        }
    }

    /// Raw bytes in wire order, trimmed to the message's length.
    pub fn bytes(&self) -> ([u8; 3], usize) {
        let len = match self.status & 0xF0 {
            0xC0 | 0xD0 => 2,
            0xF0 => match self.status {
                0xF1 | 0xF3 => 2,
                0xF2 => 3,
                _ => 1,
            },
            _ => 3,
        };
        ([self.status, self.data1, self.data2], len)
    }
}

/// A System-Exclusive message stored inline.
#[derive(Clone)]
pub struct SysExEvent {
    len: usize,
    data: [u8; MAX_SYSEX_SIZE],
}

impl SysExEvent {
    /// Copy a SysEx message. Fails if it exceeds [`MAX_SYSEX_SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HostError> {
        if bytes.len() > MAX_SYSEX_SIZE {
            return Err(HostError::SysExOverflow {
                len: bytes.len(),
                max: MAX_SYSEX_SIZE,
            });
        }
        let mut data = [0u8; MAX_SYSEX_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len(),
            data,
        })
    }

    /// The message bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Message length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length message.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for SysExEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysExEvent")
            .field("len", &self.len)
            .field("data", &self.as_bytes())
            .finish()
    }
}

impl PartialEq for SysExEvent {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SysExEvent {}

/// A classified incoming MIDI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMidi {
    Short(MidiMessage),
    SysEx(SysExEvent),
}

impl IncomingMidi {
    /// Classify raw bytes from a MIDI driver.
    ///
    /// More than 3 bytes is SysEx; 1-3 bytes is a short message. Empty input
    /// yields `Ok(None)`.
    pub fn classify(bytes: &[u8]) -> Result<Option<Self>, HostError> {
        if bytes.len() > 3 {
            return SysExEvent::from_bytes(bytes).map(|event| Some(Self::SysEx(event)));
        }
        Ok(MidiMessage::from_bytes(bytes).map(Self::Short))
    }
}
