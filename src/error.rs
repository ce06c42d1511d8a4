//! Host Errors
//!
//! Error taxonomy shared by the control-thread APIs. Nothing on the audio or
//! MIDI driver threads returns these; those threads degrade to silence or drop
//! the message and bump a counter instead.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::devices::Direction;
use crate::persistence::SettingsError;

/// Errors that can occur while configuring or running the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The per-user settings directory could not be created or written.
    /// The host cannot continue with a valid configuration.
    #[error("settings location {path} is unavailable: {source}")]
    SettingsPathUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the settings document failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A persisted device name is absent and no platform default exists.
    #[error("no {direction} audio device named {name:?} and no default {direction} device")]
    DeviceNotFound { direction: Direction, name: String },

    /// The driver refused to open or start the stream.
    #[error("failed to open audio stream: {0}")]
    StreamOpenFailed(String),

    /// The audio thread never acknowledged the shutdown fade.
    #[error("audio stream did not acknowledge shutdown within {0:?}, stream aborted")]
    StreamShutdownTimeout(Duration),

    /// Audio devices cannot be re-probed while a stream is open.
    #[error("audio devices cannot be probed while a stream is open")]
    StreamActive,

    /// MIDI could not be initialised for one direction.
    #[error("MIDI {direction} init failed: {reason}")]
    MidiInitFailed { direction: Direction, reason: String },

    /// The MIDI output driver rejected a message.
    #[error("failed to send MIDI message: {0}")]
    MidiSendFailed(String),

    /// A SysEx message exceeded the maximum size and was dropped.
    #[error("SysEx message of {len} bytes exceeds maximum of {max}")]
    SysExOverflow { len: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_not_found_display() {
        let err = HostError::DeviceNotFound {
            direction: Direction::Output,
            name: "Speakers".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("output"));
        assert!(text.contains("\"Speakers\""));
    }

    #[test]
    fn test_stream_open_failed_carries_diagnostic() {
        let err = HostError::StreamOpenFailed("sample rate not supported".to_string());
        assert!(err.to_string().contains("sample rate not supported"));
    }

    #[test]
    fn test_sysex_overflow_display() {
        let err = HostError::SysExOverflow { len: 600, max: 512 };
        assert_eq!(
            err.to_string(),
            "SysEx message of 600 bytes exceeds maximum of 512"
        );
    }
}
