//! Persistence module
//!
//! Per-user audio and MIDI settings stored as JSON.

pub mod settings;

pub use settings::{
    AudioSettings, MidiSettings, PersistedSettings, SettingsError, SettingsStore, OFF_TEXT,
    SETTINGS_FILE_NAME,
};
