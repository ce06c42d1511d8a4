//! Persisted host settings.
//!
//! The settings document is a JSON object with two sections, `audio` and
//! `midi`, stored in a per-user configuration folder. Device identifiers are
//! never stored, only display names, because identifiers are not stable across
//! OS sessions.
//!
//! Loading is forgiving: every key is read on its own and falls back to its
//! default when missing or mistyped, so a partial or hand-edited file never
//! blocks startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::HostError;

/// Name of the settings file inside the settings folder.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Sentinel port name meaning "no MIDI port selected".
pub const OFF_TEXT: &str = "off";

/// Audio section of the settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Driver-type code (selects the audio host API).
    #[serde(rename = "driver")]
    pub driver: u32,
    /// Input device display name.
    #[serde(rename = "indev")]
    pub input_device: String,
    /// Output device display name.
    #[serde(rename = "outdev")]
    pub output_device: String,
    /// 1-based hardware channel routed to engine input 0.
    #[serde(rename = "in1")]
    pub input_left: u32,
    /// 1-based hardware channel routed to engine input 1.
    #[serde(rename = "in2")]
    pub input_right: u32,
    /// 1-based hardware channel fed by engine output 0.
    #[serde(rename = "out1")]
    pub output_left: u32,
    /// 1-based hardware channel fed by engine output 1.
    #[serde(rename = "out2")]
    pub output_right: u32,
    /// Requested hardware buffer size in frames.
    #[serde(rename = "buffer")]
    pub buffer_size: u32,
    /// Sample rate in Hz.
    #[serde(rename = "sr")]
    pub sample_rate: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            driver: 0,
            input_device: "Built-in Input".to_string(),
            output_device: "Built-in Output".to_string(),
            input_left: 1,
            input_right: 2,
            output_left: 1,
            output_right: 2,
            buffer_size: 512,
            sample_rate: 44100,
        }
    }
}

/// MIDI section of the settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiSettings {
    /// Input port name, or [`OFF_TEXT`].
    #[serde(rename = "indev")]
    pub input_device: String,
    /// Output port name, or [`OFF_TEXT`].
    #[serde(rename = "outdev")]
    pub output_device: String,
    /// Input channel filter, 1-16 or 0 for any channel.
    #[serde(rename = "inchan")]
    pub input_channel: u8,
    /// Output channel, 1-16 or 0 to leave messages untouched.
    #[serde(rename = "outchan")]
    pub output_channel: u8,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            input_device: OFF_TEXT.to_string(),
            output_device: OFF_TEXT.to_string(),
            input_channel: 0,
            output_channel: 0,
        }
    }
}

/// The complete persisted configuration.
///
/// Compared as a whole to detect "no change needed" when the settings dialog
/// is confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub audio: AudioSettings,
    pub midi: MidiSettings,
}

impl PersistedSettings {
    /// Build settings from a parsed document, key by key.
    pub fn from_document(doc: &Value) -> Self {
        let defaults = Self::default();
        let audio = doc.get("audio");
        let midi = doc.get("midi");

        Self {
            audio: AudioSettings {
                driver: read_u32(audio, "driver").unwrap_or(defaults.audio.driver),
                input_device: read_string(audio, "indev").unwrap_or(defaults.audio.input_device),
                output_device: read_string(audio, "outdev")
                    .unwrap_or(defaults.audio.output_device),
                input_left: read_u32(audio, "in1").unwrap_or(defaults.audio.input_left),
                input_right: read_u32(audio, "in2").unwrap_or(defaults.audio.input_right),
                output_left: read_u32(audio, "out1").unwrap_or(defaults.audio.output_left),
                output_right: read_u32(audio, "out2").unwrap_or(defaults.audio.output_right),
                buffer_size: read_u32(audio, "buffer")
                    .filter(|&frames| frames > 0)
                    .unwrap_or(defaults.audio.buffer_size),
                sample_rate: read_u32(audio, "sr")
                    .filter(|&rate| rate > 0)
                    .unwrap_or(defaults.audio.sample_rate),
            },
            midi: MidiSettings {
                input_device: read_string(midi, "indev").unwrap_or(defaults.midi.input_device),
                output_device: read_string(midi, "outdev").unwrap_or(defaults.midi.output_device),
                input_channel: read_channel(midi, "inchan").unwrap_or(defaults.midi.input_channel),
                output_channel: read_channel(midi, "outchan")
                    .unwrap_or(defaults.midi.output_channel),
            },
        }
    }
}

fn read_u32(section: Option<&Value>, key: &str) -> Option<u32> {
    section?
        .get(key)?
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
}

fn read_string(section: Option<&Value>, key: &str) -> Option<String> {
    section?.get(key)?.as_str().map(str::to_string)
}

fn read_channel(section: Option<&Value>, key: &str) -> Option<u8> {
    read_u32(section, key)
        .filter(|&channel| channel <= 16)
        .map(|channel| channel as u8)
}

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// File I/O error.
    #[error("settings file error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Loads and saves [`PersistedSettings`] in a settings folder.
///
/// Owned by the control thread; the audio and MIDI threads never see it.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
    path: PathBuf,
}

impl SettingsStore {
    /// Store inside an explicit folder.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(SETTINGS_FILE_NAME);
        Self { dir, path }
    }

    /// Store in the per-user configuration folder for `app_name`.
    pub fn for_app(app_name: &str) -> Result<Self, HostError> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| HostError::SettingsPathUnavailable {
                path: PathBuf::from(app_name),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no per-user configuration directory",
                ),
            })?;
        Ok(Self::in_dir(base.join(app_name)))
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, creating the folder and a complete file when absent.
    ///
    /// The file is always written back so missing keys land on disk with their
    /// defaults. Fails only when the location cannot be created or written.
    pub fn load(&self) -> Result<PersistedSettings, HostError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| HostError::SettingsPathUnavailable {
            path: self.dir.clone(),
            source,
        })?;

        let settings = match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                log::debug!("Reading settings from {}", self.path.display());
                match serde_json::from_str::<Value>(&text) {
                    Ok(doc) => PersistedSettings::from_document(&doc),
                    Err(e) => {
                        log::warn!(
                            "Settings file {} is unreadable ({}), using defaults",
                            self.path.display(),
                            e
                        );
                        PersistedSettings::default()
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedSettings::default(),
            Err(source) => {
                log::warn!("Failed to read {}: {}", self.path.display(), source);
                PersistedSettings::default()
            }
        };

        self.save(&settings).map_err(|e| match e {
            SettingsError::Io(source) => HostError::SettingsPathUnavailable {
                path: self.path.clone(),
                source,
            },
            other => HostError::Settings(other),
        })?;

        Ok(settings)
    }

    /// Write all keys, overwriting the previous file.
    pub fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
