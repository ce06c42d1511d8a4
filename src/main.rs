//! Standalone Host - headless runner
//!
//! Opens the configured audio and MIDI devices with a pass-through engine and
//! runs until a line (or EOF) arrives on stdin.

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use env_logger::Env;

use standalone_host::devices::Direction;
use standalone_host::engine::{
    driver_names, CpalBackend, Engine, MidiQueues, MidiReceivers, PassThrough, ProcessBlock,
    SharedEngine,
};
use standalone_host::host::DEFAULT_APP_NAME;
use standalone_host::persistence::SettingsStore;
use standalone_host::{AppHost, HostConfig, HostError};

/// MIDI traffic seen by the engine.
#[derive(Debug, Default)]
struct MidiCounters {
    short: AtomicU64,
    sysex: AtomicU64,
}

/// Pass-through engine that drains the MIDI queues every block.
struct MonitorEngine {
    inner: PassThrough,
    midi: MidiReceivers,
    counters: Arc<MidiCounters>,
}

impl Engine for MonitorEngine {
    fn set_block_size(&mut self, block_size: usize) {
        self.inner.set_block_size(block_size);
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.inner.set_sample_rate(sample_rate);
    }

    fn on_reset(&mut self) {
        self.inner.on_reset();
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        let short = self.midi.drain_short().count() as u64;
        let sysex = self.midi.drain_sysex().count() as u64;
        if short > 0 {
            self.counters.short.fetch_add(short, Ordering::Relaxed);
        }
        if sysex > 0 {
            self.counters.sysex.fetch_add(sysex, Ordering::Relaxed);
        }
        self.inner.process(block);
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), HostError> {
    let app_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
    let config = HostConfig::new(&app_name);
    let store = SettingsStore::for_app(&config.app_name)?;

    let (senders, receivers) =
        MidiQueues::new(config.short_queue_size, config.sysex_queue_size).split();
    let counters = Arc::new(MidiCounters::default());
    let engine: SharedEngine = Arc::new(Mutex::new(MonitorEngine {
        inner: PassThrough::new(),
        midi: receivers,
        counters: Arc::clone(&counters),
    }));

    for (code, name) in driver_names().iter().enumerate() {
        log::info!("Audio driver {}: {}", code, name);
    }

    let host = AppHost::new(config, store, CpalBackend::factory(), engine, senders, None)?;

    for device in host.audio_catalog().devices() {
        log::info!(
            "Audio device {:?}: in {}, out {}{}{}",
            device.name,
            device.max_input_channels,
            device.max_output_channels,
            if device.is_default_input { " [default in]" } else { "" },
            if device.is_default_output { " [default out]" } else { "" },
        );
    }
    for direction in [Direction::Input, Direction::Output] {
        let ports = host.midi_catalog().port_names(direction);
        log::info!("MIDI {} ports: {:?}", direction, ports);
    }
    log::info!("Stream: {:?}", host.stream_status());

    println!("Press Enter to quit");
    let mut line = String::new();
    if let Err(e) = std::io::stdin().read_line(&mut line) {
        log::warn!("Failed to read stdin: {}", e);
    }

    let status = host.stream_status();
    let stats = host.midi_stats();
    log::info!(
        "Processed {} samples, {} busy callbacks; MIDI {} short, {} SysEx, {} oversize, {} queue full, {} filtered",
        status.samples_elapsed,
        status.busy_callbacks,
        counters.short.load(Ordering::Relaxed),
        counters.sysex.load(Ordering::Relaxed),
        stats.oversize_sysex(),
        stats.queue_full(),
        stats.filtered(),
    );

    drop(host);
    Ok(())
}
