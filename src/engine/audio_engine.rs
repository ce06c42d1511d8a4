//! Audio Engine
//!
//! Owns the audio backend and at most one open stream. Drives the stream
//! lifecycle `Closed -> Opening -> Running -> Ending -> Closed` from the
//! control thread; the audio callback itself runs inside a [`CallbackBridge`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::callback::{BridgeConfig, CallbackBridge, StreamFlags};
use super::processor::SharedEngine;
use crate::devices::{
    resolve_stream_devices, AudioBackend, AudioCatalog, AudioStream, BackendFactory,
    ChannelRouting, DriverType, StreamConfiguration, StreamRequest,
};
use crate::error::HostError;
use crate::persistence::AudioSettings;

/// Default interval between checks of the shutdown acknowledgment.
pub const DEFAULT_SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default time to wait for the shutdown fade before aborting.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of the audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Running,
    Ending,
}

/// Snapshot of the stream for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatus {
    pub state: StreamState,
    /// Frames handed to the engine since the stream opened.
    pub samples_elapsed: u64,
    /// Frames per hardware buffer, if a stream is open. The size the driver
    /// delivered once a callback has run, the requested size before that.
    pub buffer_size: Option<u32>,
    /// Callbacks rendered silent because the engine was busy.
    pub busy_callbacks: u32,
}

/// Stream manager tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamManagerConfig {
    pub bridge: BridgeConfig,
    pub engine_inputs: usize,
    pub engine_outputs: usize,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            engine_inputs: 2,
            engine_outputs: 2,
            poll_interval: DEFAULT_SHUTDOWN_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// The stream manager.
pub struct StreamManager {
    factory: BackendFactory,
    backend: Box<dyn AudioBackend>,
    engine: SharedEngine,
    config: StreamManagerConfig,
    catalog: AudioCatalog,
    state: StreamState,
    stream: Option<Box<dyn AudioStream>>,
    flags: Arc<StreamFlags>,
    /// Settings of the stream currently open, if any.
    active_settings: Option<AudioSettings>,
}

impl StreamManager {
    /// Build the backend for `driver` and probe its devices.
    pub fn new(
        factory: BackendFactory,
        driver: DriverType,
        engine: SharedEngine,
        config: StreamManagerConfig,
    ) -> Result<Self, HostError> {
        let mut backend = factory(driver)?;
        let catalog = backend.probe()?;
        log::info!(
            "Audio driver {} ready with {} devices",
            driver.0,
            catalog.len()
        );

        Ok(Self {
            factory,
            backend,
            engine,
            config,
            catalog,
            state: StreamState::Closed,
            stream: None,
            flags: Arc::new(StreamFlags::new()),
            active_settings: None,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether a stream is open and running.
    pub fn is_running(&self) -> bool {
        self.state == StreamState::Running
    }

    /// Devices found by the last probe.
    pub fn catalog(&self) -> &AudioCatalog {
        &self.catalog
    }

    /// Driver type of the current backend.
    pub fn driver(&self) -> DriverType {
        self.backend.driver()
    }

    /// Settings of the running stream.
    pub fn active_settings(&self) -> Option<&AudioSettings> {
        self.active_settings.as_ref()
    }

    /// Snapshot of the stream state and counters.
    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            samples_elapsed: self.flags.samples_elapsed(),
            buffer_size: self
                .stream
                .as_ref()
                .map(|stream| self.flags.buffer_size().unwrap_or(stream.buffer_size())),
            busy_callbacks: self.flags.busy_callbacks(),
        }
    }

    /// Re-enumerate audio devices.
    ///
    /// Device identifiers are only valid for the catalog they came from, so
    /// this is refused while a stream is open.
    pub fn probe_audio(&mut self) -> Result<&AudioCatalog, HostError> {
        if self.stream.is_some() {
            return Err(HostError::StreamActive);
        }
        self.catalog = self.backend.probe()?;
        Ok(&self.catalog)
    }

    /// Open and start a stream, closing any open one first.
    ///
    /// The engine is configured and reset before the stream starts. On
    /// failure the manager is left `Closed`.
    pub fn open(&mut self, request: &StreamRequest) -> Result<(), HostError> {
        self.close()?;

        let vector_size = self.config.bridge.vector_size;
        let buffer_size = request.config.buffer_size as usize;
        if buffer_size == 0 || buffer_size % vector_size != 0 {
            return Err(HostError::StreamOpenFailed(format!(
                "buffer size {} is not a multiple of the processing block size {}",
                buffer_size, vector_size
            )));
        }

        self.state = StreamState::Opening;
        match self.try_open(request) {
            Ok((stream, flags)) => {
                log::info!(
                    "Audio stream running: {} Hz, {} frames requested",
                    request.config.sample_rate,
                    stream.buffer_size()
                );
                self.stream = Some(stream);
                self.flags = flags;
                self.state = StreamState::Running;
                Ok(())
            }
            Err(e) => {
                log::error!("{}", e);
                self.state = StreamState::Closed;
                Err(e)
            }
        }
    }

    fn try_open(
        &mut self,
        request: &StreamRequest,
    ) -> Result<(Box<dyn AudioStream>, Arc<StreamFlags>), HostError> {
        {
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| HostError::StreamOpenFailed("engine lock poisoned".to_string()))?;
            engine.set_block_size(self.config.bridge.vector_size);
            engine.set_sample_rate(f64::from(request.config.sample_rate));
            engine.on_reset();
        }

        let flags = Arc::new(StreamFlags::new());
        let bridge = CallbackBridge::new(
            Arc::clone(&self.engine),
            Arc::clone(&flags),
            self.config.bridge,
            request.routing.engine_inputs(),
            request.routing.engine_outputs(),
        );

        let mut stream = self.backend.open_stream(request, bridge)?;
        if let Err(e) = stream.start() {
            stream.abort();
            return Err(e);
        }
        Ok((stream, flags))
    }

    /// Fade out and close the stream. A no-op when nothing is open.
    ///
    /// Blocks until the audio thread has rendered its fade-out buffer. If no
    /// acknowledgment arrives within the shutdown timeout the stream is
    /// aborted anyway and `StreamShutdownTimeout` is returned.
    pub fn close(&mut self) -> Result<(), HostError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        self.state = StreamState::Ending;
        self.flags.request_end();

        let started = Instant::now();
        let mut timed_out = false;
        while !self.flags.is_done() {
            if started.elapsed() >= self.config.shutdown_timeout {
                timed_out = true;
                break;
            }
            thread::sleep(self.config.poll_interval);
        }

        stream.abort();
        self.state = StreamState::Closed;
        self.active_settings = None;

        if timed_out {
            log::warn!("Audio stream did not acknowledge shutdown, aborted");
            return Err(HostError::StreamShutdownTimeout(self.config.shutdown_timeout));
        }
        log::info!("Audio stream closed");
        Ok(())
    }

    /// Apply new audio settings.
    ///
    /// Unless `force` is set, this is a no-op when `settings` match the running
    /// stream. Otherwise the stream is closed, the backend is rebuilt if the
    /// driver type changed, devices are resolved and a new stream is opened.
    ///
    /// Returns the settings actually in use, which differ from `settings` when
    /// a missing device fell back to the platform default. On
    /// `DeviceNotFound` no stream is opened.
    pub fn change_configuration(
        &mut self,
        settings: &AudioSettings,
        force: bool,
    ) -> Result<AudioSettings, HostError> {
        if !force && self.is_running() && self.active_settings.as_ref() == Some(settings) {
            return Ok(settings.clone());
        }

        if let Err(e) = self.close() {
            log::warn!("{}", e);
        }

        let driver = DriverType::from(settings.driver);
        if driver != self.backend.driver() {
            log::info!("Switching audio driver {} -> {}", self.backend.driver().0, driver.0);
            self.backend = (self.factory)(driver)?;
        }
        self.probe_audio()?;

        let mut resolved = settings.clone();
        let resolution =
            resolve_stream_devices(&mut resolved, &self.catalog, self.backend.shares_duplex_device());
        let (input_device, output_device) = resolution.ids()?;
        if resolution.reset_to_default {
            log::info!(
                "Audio device fell back to default: in {:?}, out {:?}",
                resolved.input_device,
                resolved.output_device
            );
        }

        let request = StreamRequest {
            config: StreamConfiguration {
                input_device,
                output_device,
                sample_rate: resolved.sample_rate,
                buffer_size: resolved.buffer_size,
            },
            routing: ChannelRouting::from_settings(
                &resolved,
                self.config.engine_inputs,
                self.config.engine_outputs,
            ),
        };
        self.open(&request)?;
        self.active_settings = Some(resolved.clone());
        Ok(resolved)
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{}", e);
        }
    }
}
