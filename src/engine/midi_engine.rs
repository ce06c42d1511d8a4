//! MIDI Engine
//!
//! Bridges MIDI driver callbacks into the engine's lock-free queues, and owns
//! the optional MIDI output port. Uses midir for cross-platform MIDI access
//! and rtrb (through [`MidiSenders`]) to hand messages over without locks.
//!
//! Input and output are initialised independently: if one direction fails
//! the other keeps working.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use super::channels::MidiSenders;
use super::events::{IncomingMidi, MidiMessage};
use crate::devices::{Direction, MidiCatalog, PortLayout, PortSelection};
use crate::error::HostError;

/// Counters written by the MIDI driver thread.
#[derive(Debug, Default)]
pub struct MidiStats {
    oversize_sysex: AtomicU32,
    queue_full: AtomicU32,
    filtered: AtomicU32,
}

impl MidiStats {
    /// SysEx messages dropped for exceeding the maximum size.
    pub fn oversize_sysex(&self) -> u32 {
        self.oversize_sysex.load(Ordering::Relaxed)
    }

    /// Messages dropped because the engine's queue was full.
    pub fn queue_full(&self) -> u32 {
        self.queue_full.load(Ordering::Relaxed)
    }

    /// Short messages dropped by the input channel filter.
    pub fn filtered(&self) -> u32 {
        self.filtered.load(Ordering::Relaxed)
    }
}

/// State owned by the MIDI input callback.
pub struct MidiInputContext {
    senders: MidiSenders,
    exiting: Arc<AtomicBool>,
    stats: Arc<MidiStats>,
    /// 1-16, or 0 for any channel.
    channel_filter: u8,
}

impl MidiInputContext {
    /// Create a context that feeds `senders`.
    pub fn new(senders: MidiSenders, exiting: Arc<AtomicBool>, stats: Arc<MidiStats>) -> Self {
        Self {
            senders,
            exiting,
            stats,
            channel_filter: 0,
        }
    }

    /// Only accept channel-voice messages on `channel` (1-16); 0 accepts all.
    pub fn set_channel_filter(&mut self, channel: u8) {
        self.channel_filter = channel;
    }

    /// Handle one message from the driver.
    ///
    /// REAL-TIME SAFE: no allocation, no locks, no logging.
    pub fn handle(&mut self, bytes: &[u8]) {
        if bytes.is_empty() || self.exiting.load(Ordering::Acquire) {
            return;
        }

        match IncomingMidi::classify(bytes) {
            Ok(Some(IncomingMidi::SysEx(event))) => {
                if self.senders.send_sysex(event).is_err() {
                    self.stats.queue_full.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(Some(IncomingMidi::Short(msg))) => {
                let wanted = self.channel_filter;
                if wanted != 0 && msg.channel().is_some_and(|channel| channel + 1 != wanted) {
                    self.stats.filtered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                if self.senders.send_short(msg).is_err() {
                    self.stats.queue_full.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(None) => {}
            Err(_) => {
                self.stats.oversize_sysex.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

type ContextSlot = Arc<Mutex<Option<MidiInputContext>>>;

/// Callback data handed to midir.
///
/// midir drops the callback data when a connection attempt fails, so the
/// context parks itself back in its slot on drop instead of being lost.
struct ContextHandle {
    context: Option<MidiInputContext>,
    home: ContextSlot,
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            if let Ok(mut slot) = self.home.lock() {
                *slot = Some(context);
            }
        }
    }
}

fn on_midi_input(_timestamp_us: u64, bytes: &[u8], handle: &mut ContextHandle) {
    if let Some(context) = handle.context.as_mut() {
        context.handle(bytes);
    }
}

/// MIDI input and output ports of the host.
pub struct MidiEngine {
    client_name: String,
    layout: PortLayout,
    input_client: Option<MidiInput>,
    input_connection: Option<MidiInputConnection<ContextHandle>>,
    input_context: ContextSlot,
    output_client: Option<MidiOutput>,
    output_connection: Option<MidiOutputConnection>,
    /// 1-16, or 0 to send messages unchanged.
    output_channel: u8,
    stats: Arc<MidiStats>,
}

impl MidiEngine {
    /// Create the engine. No driver is touched until
    /// [`MidiEngine::init_input`] / [`MidiEngine::init_output`].
    ///
    /// Messages arriving once `exiting` is set are discarded.
    pub fn new(
        client_name: &str,
        layout: PortLayout,
        senders: MidiSenders,
        exiting: Arc<AtomicBool>,
    ) -> Self {
        let stats = Arc::new(MidiStats::default());
        let context = MidiInputContext::new(senders, exiting, Arc::clone(&stats));
        Self {
            client_name: client_name.to_string(),
            layout,
            input_client: None,
            input_connection: None,
            input_context: Arc::new(Mutex::new(Some(context))),
            output_client: None,
            output_connection: None,
            output_channel: 0,
            stats,
        }
    }

    /// Create the MIDI input client.
    pub fn init_input(&mut self) -> Result<(), HostError> {
        let mut client = MidiInput::new(&self.client_name).map_err(|e| HostError::MidiInitFailed {
            direction: Direction::Input,
            reason: e.to_string(),
        })?;
        // SysEx and active sensing pass, timing clock is ignored
        client.ignore(Ignore::Time);
        self.input_client = Some(client);
        Ok(())
    }

    /// Create the MIDI output client.
    pub fn init_output(&mut self) -> Result<(), HostError> {
        let client = MidiOutput::new(&self.client_name).map_err(|e| HostError::MidiInitFailed {
            direction: Direction::Output,
            reason: e.to_string(),
        })?;
        self.output_client = Some(client);
        Ok(())
    }

    /// Whether MIDI input is usable.
    pub fn input_available(&self) -> bool {
        self.input_client.is_some() || self.input_connection.is_some()
    }

    /// Whether MIDI output is usable.
    pub fn output_available(&self) -> bool {
        self.output_client.is_some() || self.output_connection.is_some()
    }

    /// Counters from the input callback.
    pub fn stats(&self) -> &MidiStats {
        &self.stats
    }

    /// Enumerate ports with short-lived probe clients.
    ///
    /// Independent of any open audio stream or MIDI connection. A direction
    /// whose driver cannot be opened yields no hardware ports.
    pub fn probe(&self) -> MidiCatalog {
        let probe_name = format!("{} probe", self.client_name);

        let inputs = match MidiInput::new(&probe_name) {
            Ok(client) => client
                .ports()
                .iter()
                .map(|p| client.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
                .collect(),
            Err(e) => {
                log::warn!("MIDI input probe failed: {}", e);
                Vec::new()
            }
        };

        let outputs = match MidiOutput::new(&probe_name) {
            Ok(client) => client
                .ports()
                .iter()
                .map(|p| client.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
                .collect(),
            Err(e) => {
                log::warn!("MIDI output probe failed: {}", e);
                Vec::new()
            }
        };

        MidiCatalog::new(self.layout, inputs, outputs)
    }

    /// Close the input port, keeping the client for the next selection.
    pub fn close_input(&mut self) {
        if let Some(connection) = self.input_connection.take() {
            let (client, handle) = connection.close();
            drop(handle);
            self.input_client = Some(client);
            log::info!("MIDI input closed");
        }
    }

    /// Close the output port, keeping the client for the next selection.
    pub fn close_output(&mut self) {
        if let Some(connection) = self.output_connection.take() {
            self.output_client = Some(connection.close());
            log::info!("MIDI output closed");
        }
    }

    /// Open an input port. `channel_filter` is 1-16, or 0 for any channel.
    pub fn open_input(
        &mut self,
        selection: PortSelection,
        channel_filter: u8,
    ) -> Result<(), HostError> {
        self.close_input();
        // None selects the virtual port
        let hardware_index = match selection {
            PortSelection::Off => return Ok(()),
            PortSelection::Virtual => None,
            PortSelection::Hardware(index) => Some(index),
        };

        let fail = |reason: String| HostError::MidiInitFailed {
            direction: Direction::Input,
            reason,
        };

        let client = self
            .input_client
            .take()
            .ok_or_else(|| fail("MIDI input is not initialised".to_string()))?;

        let parked = self.input_context.lock().ok().and_then(|mut slot| slot.take());
        let Some(mut context) = parked else {
            self.input_client = Some(client);
            return Err(fail("MIDI input queue is unavailable".to_string()));
        };
        context.set_channel_filter(channel_filter);
        let handle = ContextHandle {
            context: Some(context),
            home: Arc::clone(&self.input_context),
        };

        let result = match hardware_index {
            None => {
                let port_name = format!("To {}", self.client_name);
                connect_virtual_input(client, &port_name, handle)
            }
            Some(index) => {
                let ports = client.ports();
                match ports.get(index) {
                    Some(port) => client
                        .connect(port, &self.client_name, on_midi_input, handle)
                        .map_err(|e| {
                            let reason = e.to_string();
                            (e.into_inner(), reason)
                        }),
                    None => Err((client, format!("no MIDI input port at index {}", index))),
                }
            }
        };

        match result {
            Ok(connection) => {
                self.input_connection = Some(connection);
                log::info!("MIDI input opened: {:?}", selection);
                Ok(())
            }
            Err((client, reason)) => {
                self.input_client = Some(client);
                Err(fail(reason))
            }
        }
    }

    /// Open an output port. `channel` is 1-16, or 0 to leave messages as sent.
    pub fn open_output(&mut self, selection: PortSelection, channel: u8) -> Result<(), HostError> {
        self.close_output();
        self.output_channel = channel;
        let hardware_index = match selection {
            PortSelection::Off => return Ok(()),
            PortSelection::Virtual => None,
            PortSelection::Hardware(index) => Some(index),
        };

        let fail = |reason: String| HostError::MidiInitFailed {
            direction: Direction::Output,
            reason,
        };

        let client = self
            .output_client
            .take()
            .ok_or_else(|| fail("MIDI output is not initialised".to_string()))?;

        let result = match hardware_index {
            None => {
                let port_name = format!("From {}", self.client_name);
                connect_virtual_output(client, &port_name)
            }
            Some(index) => {
                let ports = client.ports();
                match ports.get(index) {
                    Some(port) => client.connect(port, &self.client_name).map_err(|e| {
                        let reason = e.to_string();
                        (e.into_inner(), reason)
                    }),
                    None => Err((client, format!("no MIDI output port at index {}", index))),
                }
            }
        };

        match result {
            Ok(connection) => {
                self.output_connection = Some(connection);
                log::info!("MIDI output opened: {:?}", selection);
                Ok(())
            }
            Err((client, reason)) => {
                self.output_client = Some(client);
                Err(fail(reason))
            }
        }
    }

    /// Send a short message on the output port, if one is open.
    pub fn send_short(&mut self, msg: MidiMessage) -> Result<(), HostError> {
        let msg = match self.output_channel {
            0 => msg,
            channel => msg.with_channel(channel - 1),
        };
        let (bytes, len) = msg.bytes();
        self.send_raw(&bytes[..len])
    }

    /// Send a SysEx message on the output port, if one is open.
    pub fn send_sysex(&mut self, bytes: &[u8]) -> Result<(), HostError> {
        self.send_raw(bytes)
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), HostError> {
        match self.output_connection.as_mut() {
            Some(connection) => connection
                .send(bytes)
                .map_err(|e| HostError::MidiSendFailed(e.to_string())),
            None => Ok(()),
        }
    }

    /// Whether an input port is open.
    pub fn is_input_open(&self) -> bool {
        self.input_connection.is_some()
    }

    /// Whether an output port is open.
    pub fn is_output_open(&self) -> bool {
        self.output_connection.is_some()
    }
}

impl Drop for MidiEngine {
    fn drop(&mut self) {
        self.close_input();
        self.close_output();
    }
}

type InputConnectResult = Result<MidiInputConnection<ContextHandle>, (MidiInput, String)>;
type OutputConnectResult = Result<MidiOutputConnection, (MidiOutput, String)>;

#[cfg(unix)]
fn connect_virtual_input(client: MidiInput, port_name: &str, handle: ContextHandle) -> InputConnectResult {
    use midir::os::unix::VirtualInput;
    client
        .create_virtual(port_name, on_midi_input, handle)
        .map_err(|e| {
            let reason = e.to_string();
            (e.into_inner(), reason)
        })
}

#[cfg(not(unix))]
fn connect_virtual_input(client: MidiInput, _port_name: &str, _handle: ContextHandle) -> InputConnectResult {
    Err((client, "virtual MIDI ports are not supported on this platform".to_string()))
}

#[cfg(unix)]
fn connect_virtual_output(client: MidiOutput, port_name: &str) -> OutputConnectResult {
    use midir::os::unix::VirtualOutput;
    client.create_virtual(port_name).map_err(|e| {
        let reason = e.to_string();
        (e.into_inner(), reason)
    })
}

#[cfg(not(unix))]
fn connect_virtual_output(client: MidiOutput, _port_name: &str) -> OutputConnectResult {
    Err((client, "virtual MIDI ports are not supported on this platform".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channels::{MidiQueues, MidiReceivers};
    use crate::engine::events::MAX_SYSEX_SIZE;

    fn context() -> (MidiInputContext, MidiReceivers, Arc<AtomicBool>, Arc<MidiStats>) {
        let (senders, receivers) = MidiQueues::new(16, 4).split();
        let exiting = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(MidiStats::default());
        let context = MidiInputContext::new(senders, Arc::clone(&exiting), Arc::clone(&stats));
        (context, receivers, exiting, stats)
    }

    #[test]
    fn test_short_messages_are_packed() {
        let (mut ctx, mut rx, _, _) = context();
        ctx.handle(&[0x90, 60, 100]);
        ctx.handle(&[0xC1, 7]);
        ctx.handle(&[0xFE]);

        let received: Vec<_> = rx.drain_short().collect();
        assert_eq!(
            received,
            vec![
                MidiMessage::new(0x90, 60, 100),
                MidiMessage::new(0xC1, 7, 0),
                MidiMessage::new(0xFE, 0, 0),
            ]
        );
    }

    #[test]
    fn test_sysex_goes_to_sysex_queue() {
        let (mut ctx, mut rx, _, _) = context();
        let sysex = [0xF0, 0x43, 0x10, 0x4C, 0x00, 0xF7];
        ctx.handle(&sysex);

        assert_eq!(rx.short_pending(), 0);
        let event = rx.recv_sysex().unwrap();
        assert_eq!(event.as_bytes(), &sysex);
    }

    #[test]
    fn test_oversize_sysex_dropped_without_side_effects() {
        let (mut ctx, mut rx, _, stats) = context();
        let big = vec![0xF0; MAX_SYSEX_SIZE + 10];
        ctx.handle(&big);
        assert_eq!(stats.oversize_sysex(), 1);
        assert_eq!(rx.sysex_pending(), 0);

        ctx.handle(&[0xF0, 0x01, 0x02, 0xF7]);
        ctx.handle(&[0x80, 60, 0]);
        assert_eq!(rx.recv_sysex().unwrap().len(), 4);
        assert_eq!(rx.recv_short(), Some(MidiMessage::new(0x80, 60, 0)));
    }

    #[test]
    fn test_messages_after_exit_are_discarded() {
        let (mut ctx, mut rx, exiting, _) = context();
        ctx.handle(&[0x90, 60, 100]);
        exiting.store(true, Ordering::Release);
        ctx.handle(&[0x90, 62, 100]);
        ctx.handle(&[0xF0, 0x01, 0x02, 0xF7]);

        assert_eq!(rx.drain_short().count(), 1);
        assert_eq!(rx.sysex_pending(), 0);
    }

    #[test]
    fn test_channel_filter() {
        let (mut ctx, mut rx, _, stats) = context();
        ctx.set_channel_filter(2);
        ctx.handle(&[0x90, 60, 100]); // channel 1
        ctx.handle(&[0x91, 60, 100]); // channel 2
        ctx.handle(&[0xF8]); // clock, no channel

        let received: Vec<_> = rx.drain_short().collect();
        assert_eq!(
            received,
            vec![MidiMessage::new(0x91, 60, 100), MidiMessage::new(0xF8, 0, 0)]
        );
        assert_eq!(stats.filtered(), 1);
    }

    #[test]
    fn test_full_queue_is_counted() {
        let (senders, _rx) = MidiQueues::new(1, 1).split();
        let stats = Arc::new(MidiStats::default());
        let mut ctx = MidiInputContext::new(senders, Arc::new(AtomicBool::new(false)), Arc::clone(&stats));
        ctx.handle(&[0x90, 60, 100]);
        ctx.handle(&[0x90, 61, 100]);
        assert_eq!(stats.queue_full(), 1);
    }

    #[test]
    fn test_dropped_handle_parks_context() {
        let (ctx, _rx, _, _) = context();
        let home: ContextSlot = Arc::new(Mutex::new(None));
        let handle = ContextHandle {
            context: Some(ctx),
            home: Arc::clone(&home),
        };
        drop(handle);
        assert!(home.lock().unwrap().is_some());
    }

    #[test]
    fn test_callback_forwards_to_context() {
        let (ctx, mut rx, _, _) = context();
        let mut handle = ContextHandle {
            context: Some(ctx),
            home: Arc::new(Mutex::new(None)),
        };
        on_midi_input(0, &[0xB0, 1, 64], &mut handle);
        assert_eq!(rx.recv_short(), Some(MidiMessage::new(0xB0, 1, 64)));
    }
}
