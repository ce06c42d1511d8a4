//! Host context
//!
//! [`AppHost`] ties the settings store, stream manager and MIDI engine
//! together and runs the startup sequence. It is an explicit value owned by
//! the caller; several hosts can coexist, e.g. under test.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::devices::{
    resolve_midi_port, AudioCatalog, BackendFactory, Direction, DriverType, MidiCatalog,
    PortLayout, PortSelection,
};
use crate::engine::{
    BridgeConfig, MidiEngine, MidiMessage, MidiSenders, MidiStats, SharedEngine, StreamManager,
    StreamManagerConfig, StreamStatus, DEFAULT_OUTPUT_GAIN, DEFAULT_SHORT_QUEUE_SIZE,
    DEFAULT_SHUTDOWN_POLL_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_SYSEX_QUEUE_SIZE,
    DEFAULT_VECTOR_SIZE, DEFAULT_WARM_UP_BUFFERS,
};
use crate::error::HostError;
use crate::persistence::{PersistedSettings, SettingsStore, OFF_TEXT};

/// Application name used when none is configured.
pub const DEFAULT_APP_NAME: &str = "StandaloneHost";

/// Message shown when the configured audio devices cannot be used.
pub const CHECK_AUDIO_SETTINGS: &str = "Please check the audio settings";

/// Runtime configuration. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Names the settings folder and the virtual MIDI ports.
    pub app_name: String,
    /// Fixed engine block size in frames.
    pub vector_size: usize,
    /// Hardware buffers held silent after a stream starts. Opt-in: with the
    /// default of 0 processing starts on the first buffer, which is faded in.
    /// Raise it for devices that click while starting up.
    pub warm_up_buffers: u32,
    /// Multiplier applied to every output sample.
    pub output_gain: f32,
    pub engine_inputs: usize,
    pub engine_outputs: usize,
    pub short_queue_size: usize,
    pub sysex_queue_size: usize,
    /// Interval between checks for the shutdown fade acknowledgment.
    pub poll_interval: Duration,
    /// Time to wait for the shutdown fade before aborting the stream.
    pub shutdown_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            vector_size: DEFAULT_VECTOR_SIZE,
            warm_up_buffers: DEFAULT_WARM_UP_BUFFERS,
            output_gain: DEFAULT_OUTPUT_GAIN,
            engine_inputs: 2,
            engine_outputs: 2,
            short_queue_size: DEFAULT_SHORT_QUEUE_SIZE,
            sysex_queue_size: DEFAULT_SYSEX_QUEUE_SIZE,
            poll_interval: DEFAULT_SHUTDOWN_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl HostConfig {
    /// Defaults with the given application name.
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            ..Self::default()
        }
    }

    fn stream_manager_config(&self) -> StreamManagerConfig {
        StreamManagerConfig {
            bridge: BridgeConfig {
                vector_size: self.vector_size.max(1),
                warm_up_buffers: self.warm_up_buffers,
                output_gain: self.output_gain,
            },
            engine_inputs: self.engine_inputs,
            engine_outputs: self.engine_outputs,
            poll_interval: self.poll_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Optional user-interface collaborator.
pub trait UiHost {
    /// Show a message to the user.
    fn alert(&self, title: &str, message: &str);
}

/// The standalone host.
pub struct AppHost {
    config: HostConfig,
    store: SettingsStore,
    settings: PersistedSettings,
    audio: StreamManager,
    midi: MidiEngine,
    midi_catalog: MidiCatalog,
    exiting: Arc<AtomicBool>,
    ui: Option<Box<dyn UiHost>>,
}

impl AppHost {
    /// Run the startup sequence.
    ///
    /// Only an unusable settings location or backend is fatal. Missing
    /// devices, a stream that fails to open and MIDI failures are reported and
    /// the host keeps running without that part.
    pub fn new(
        config: HostConfig,
        store: SettingsStore,
        backend_factory: BackendFactory,
        engine: SharedEngine,
        midi_senders: MidiSenders,
        ui: Option<Box<dyn UiHost>>,
    ) -> Result<Self, HostError> {
        let settings = store.load()?;
        log::info!("Settings loaded from {}", store.path().display());

        let audio = StreamManager::new(
            backend_factory,
            DriverType::from(settings.audio.driver),
            engine,
            config.stream_manager_config(),
        )?;

        let exiting = Arc::new(AtomicBool::new(false));
        let mut midi = MidiEngine::new(
            &config.app_name,
            PortLayout::platform(),
            midi_senders,
            Arc::clone(&exiting),
        );
        if let Err(e) = midi.init_input() {
            log::error!("{}", e);
        }
        if let Err(e) = midi.init_output() {
            log::error!("{}", e);
        }
        let midi_catalog = midi.probe();

        let mut host = Self {
            config,
            store,
            settings,
            audio,
            midi,
            midi_catalog,
            exiting,
            ui,
        };

        let mut changed = host.select_midi();
        let requested = host.settings.audio.clone();
        match host.audio.change_configuration(&requested, true) {
            Ok(used) => {
                if used != host.settings.audio {
                    host.settings.audio = used;
                    changed = true;
                }
            }
            Err(e) => host.report_audio_error(&e),
        }
        if changed {
            host.persist();
        }

        Ok(host)
    }

    /// Current settings.
    pub fn settings(&self) -> &PersistedSettings {
        &self.settings
    }

    /// Runtime configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Audio devices from the last probe.
    pub fn audio_catalog(&self) -> &AudioCatalog {
        self.audio.catalog()
    }

    /// MIDI ports from the last probe.
    pub fn midi_catalog(&self) -> &MidiCatalog {
        &self.midi_catalog
    }

    /// Stream state and counters.
    pub fn stream_status(&self) -> StreamStatus {
        self.audio.status()
    }

    /// MIDI input counters.
    pub fn midi_stats(&self) -> &MidiStats {
        self.midi.stats()
    }

    /// Re-enumerate audio devices. Refused while a stream is open.
    pub fn probe_audio(&mut self) -> Result<&AudioCatalog, HostError> {
        self.audio.probe_audio()
    }

    /// Re-enumerate MIDI ports.
    pub fn probe_midi(&mut self) -> &MidiCatalog {
        self.midi_catalog = self.midi.probe();
        &self.midi_catalog
    }

    /// Apply settings confirmed in a settings dialog and persist them.
    ///
    /// The audio stream is only reopened when the audio section differs from
    /// the running stream, and MIDI ports only when the MIDI section changed.
    /// An audio error is reported and returned; the settings are still
    /// persisted as requested.
    pub fn apply_settings(&mut self, new: PersistedSettings) -> Result<(), HostError> {
        let midi_changed = new.midi != self.settings.midi;
        self.settings = new;

        if midi_changed {
            self.select_midi();
        }

        let requested = self.settings.audio.clone();
        let result = match self.audio.change_configuration(&requested, false) {
            Ok(used) => {
                self.settings.audio = used;
                Ok(())
            }
            Err(e) => {
                self.report_audio_error(&e);
                Err(e)
            }
        };

        self.persist();
        result
    }

    /// Send a short message on the MIDI output, if one is open.
    pub fn send_midi(&mut self, msg: MidiMessage) -> Result<(), HostError> {
        self.midi.send_short(msg)
    }

    /// Send a SysEx message on the MIDI output, if one is open.
    pub fn send_sysex(&mut self, bytes: &[u8]) -> Result<(), HostError> {
        self.midi.send_sysex(bytes)
    }

    /// Open the MIDI ports named in the settings.
    ///
    /// Names missing from the catalog are switched to off. Returns whether
    /// the settings changed.
    fn select_midi(&mut self) -> bool {
        let mut changed = false;

        for direction in [Direction::Input, Direction::Output] {
            let (name, channel) = match direction {
                Direction::Input => (
                    &mut self.settings.midi.input_device,
                    self.settings.midi.input_channel,
                ),
                Direction::Output => (
                    &mut self.settings.midi.output_device,
                    self.settings.midi.output_channel,
                ),
            };

            let selection = match resolve_midi_port(&self.midi_catalog, direction, name) {
                Some(selection) => selection,
                None => {
                    log::warn!("MIDI {} port {:?} not found, switching it off", direction, name);
                    *name = OFF_TEXT.to_string();
                    changed = true;
                    PortSelection::Off
                }
            };

            let result = match direction {
                Direction::Input => self.midi.open_input(selection, channel),
                Direction::Output => self.midi.open_output(selection, channel),
            };
            if let Err(e) = result {
                log::error!("{}", e);
            }
        }

        changed
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.settings) {
            log::warn!("Failed to save settings: {}", e);
        }
    }

    fn report_audio_error(&self, error: &HostError) {
        log::error!("{}", error);
        let message = match error {
            HostError::DeviceNotFound { .. } => CHECK_AUDIO_SETTINGS.to_string(),
            other => format!("{}. {}", other, CHECK_AUDIO_SETTINGS),
        };
        if let Some(ui) = &self.ui {
            ui.alert(&self.config.app_name, &message);
        }
    }
}

impl Drop for AppHost {
    fn drop(&mut self) {
        self.exiting.store(true, Ordering::Release);
        if let Err(e) = self.audio.close() {
            log::warn!("{}", e);
        }
        self.midi.close_input();
        self.midi.close_output();
        log::info!("Host shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{factory, Script};
    use crate::engine::{MidiQueues, PassThrough, StreamState};
    use crate::persistence::AudioSettings;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingUi {
        alerts: Arc<Mutex<Vec<String>>>,
    }

    impl UiHost for RecordingUi {
        fn alert(&self, _title: &str, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
    }

    fn test_config() -> HostConfig {
        HostConfig {
            shutdown_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
            ..HostConfig::new("HostTest")
        }
    }

    fn start(store: &SettingsStore, script: Script, ui: Option<Box<dyn UiHost>>) -> AppHost {
        let engine: SharedEngine = Arc::new(Mutex::new(PassThrough::new()));
        let (senders, _receivers) = MidiQueues::with_defaults().split();
        AppHost::new(test_config(), store.clone(), factory(script), engine, senders, ui).unwrap()
    }

    fn write_settings(store: &SettingsStore, settings: &PersistedSettings) {
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        store.save(settings).unwrap();
    }

    #[test]
    fn test_startup_falls_back_to_default_devices() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(tmp.path());
        let script = Script {
            defaults: true,
            ..Script::default()
        };
        let host = start(&store, script, None);

        assert_eq!(host.stream_status().state, StreamState::Running);
        assert_eq!(host.settings().audio.input_device, "Built-in");
        assert_eq!(host.settings().audio.output_device, "Built-in");

        let on_disk = store.load().unwrap();
        assert_eq!(on_disk.audio.output_device, "Built-in");
    }

    #[test]
    fn test_missing_device_alerts_and_keeps_running() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(tmp.path());
        let ui = RecordingUi::default();
        let alerts = Arc::clone(&ui.alerts);

        let host = start(&store, Script::default(), Some(Box::new(ui)));
        assert_eq!(host.stream_status().state, StreamState::Closed);
        assert_eq!(alerts.lock().unwrap().as_slice(), &[CHECK_AUDIO_SETTINGS.to_string()]);
        assert_eq!(host.settings().audio, AudioSettings::default());
    }

    #[test]
    fn test_missing_midi_port_switched_off() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(tmp.path());
        let mut settings = PersistedSettings::default();
        settings.audio.input_device = "Interface".to_string();
        settings.audio.output_device = "Interface".to_string();
        settings.midi.input_device = "No Such Keyboard 1234".to_string();
        write_settings(&store, &settings);

        let host = start(&store, Script::default(), None);
        assert_eq!(host.settings().midi.input_device, OFF_TEXT);
        assert_eq!(store.load().unwrap().midi.input_device, OFF_TEXT);
        assert_eq!(host.stream_status().state, StreamState::Running);
    }

    #[test]
    fn test_apply_settings_reopens_only_on_change() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(tmp.path());
        let script = Script {
            defaults: true,
            ..Script::default()
        };
        let opened = Arc::clone(&script.opened);
        let mut host = start(&store, script, None);
        assert_eq!(opened.lock().unwrap().len(), 1);

        let same = host.settings().clone();
        host.apply_settings(same).unwrap();
        assert_eq!(opened.lock().unwrap().len(), 1);

        let mut faster = host.settings().clone();
        faster.audio.buffer_size = 128;
        host.apply_settings(faster).unwrap();
        assert_eq!(opened.lock().unwrap().len(), 2);
        assert_eq!(store.load().unwrap().audio.buffer_size, 128);
    }

    #[test]
    fn test_apply_settings_returns_audio_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(tmp.path());
        let mut host = start(&store, Script::default(), None);

        let mut bad = host.settings().clone();
        bad.audio.output_device = "Missing".to_string();
        let result = host.apply_settings(bad);
        assert!(matches!(result, Err(HostError::DeviceNotFound { .. })));
        assert_eq!(store.load().unwrap().audio.output_device, "Missing");
    }

    #[test]
    fn test_unusable_settings_location_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = SettingsStore::in_dir(blocker.join("settings"));

        let engine: SharedEngine = Arc::new(Mutex::new(PassThrough::new()));
        let (senders, _receivers) = MidiQueues::with_defaults().split();
        let result = AppHost::new(
            test_config(),
            store,
            factory(Script::default()),
            engine,
            senders,
            None,
        );
        assert!(matches!(result, Err(HostError::SettingsPathUnavailable { .. })));
    }

    #[test]
    fn test_drop_closes_stream_with_fade() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(tmp.path());
        let script = Script {
            defaults: true,
            ..Script::default()
        };
        let host = start(&store, script, None);
        assert_eq!(host.stream_status().state, StreamState::Running);
        drop(host);
    }
}
