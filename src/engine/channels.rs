//! MIDI Channels
//!
//! Lock-free communication between the MIDI driver thread and the engine.
//! Uses rtrb ring buffers for SPSC (single-producer, single-consumer) queues:
//! one for short messages and one for SysEx. Each queue is FIFO; there is no
//! ordering between the two.

use rtrb::{Consumer, Producer, RingBuffer};

use super::events::{MidiMessage, SysExEvent};

/// Default capacity of the short-message queue.
pub const DEFAULT_SHORT_QUEUE_SIZE: usize = 1024;

/// Default capacity of the SysEx queue.
pub const DEFAULT_SYSEX_QUEUE_SIZE: usize = 64;

/// Both MIDI queues before they are split between threads.
pub struct MidiQueues {
    short_tx: Producer<MidiMessage>,
    short_rx: Consumer<MidiMessage>,
    sysex_tx: Producer<SysExEvent>,
    sysex_rx: Consumer<SysExEvent>,
}

impl MidiQueues {
    /// Create queues with the given capacities.
    pub fn new(short_capacity: usize, sysex_capacity: usize) -> Self {
        let (short_tx, short_rx) = RingBuffer::new(short_capacity);
        let (sysex_tx, sysex_rx) = RingBuffer::new(sysex_capacity);

        Self {
            short_tx,
            short_rx,
            sysex_tx,
            sysex_rx,
        }
    }

    /// Create queues with default capacities.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SHORT_QUEUE_SIZE, DEFAULT_SYSEX_QUEUE_SIZE)
    }

    /// Split into the driver-side senders and the engine-side receivers.
    pub fn split(self) -> (MidiSenders, MidiReceivers) {
        let senders = MidiSenders {
            short_tx: self.short_tx,
            sysex_tx: self.sysex_tx,
        };
        let receivers = MidiReceivers {
            short_rx: self.short_rx,
            sysex_rx: self.sysex_rx,
        };
        (senders, receivers)
    }
}

/// Driver-side handle. Lives inside the MIDI input callback.
///
/// REAL-TIME SAFE: every method is non-blocking and allocation-free.
pub struct MidiSenders {
    short_tx: Producer<MidiMessage>,
    sysex_tx: Producer<SysExEvent>,
}

impl MidiSenders {
    /// Queue a short message.
    /// Returns Err(msg) if the queue is full.
    pub fn send_short(&mut self, msg: MidiMessage) -> Result<(), MidiMessage> {
        self.short_tx
            .push(msg)
            .map_err(|rtrb::PushError::Full(msg)| msg)
    }

    /// Queue a SysEx message.
    /// Returns Err(event) if the queue is full.
    pub fn send_sysex(&mut self, event: SysExEvent) -> Result<(), SysExEvent> {
        self.sysex_tx
            .push(event)
            .map_err(|rtrb::PushError::Full(event)| event)
    }

    /// Free slots in the short-message queue.
    pub fn short_slots_available(&self) -> usize {
        self.short_tx.slots()
    }
}

/// Engine-side handle, drained on the engine's own schedule.
pub struct MidiReceivers {
    short_rx: Consumer<MidiMessage>,
    sysex_rx: Consumer<SysExEvent>,
}

impl MidiReceivers {
    /// Receive the oldest pending short message.
    pub fn recv_short(&mut self) -> Option<MidiMessage> {
        self.short_rx.pop().ok()
    }

    /// Receive the oldest pending SysEx message.
    pub fn recv_sysex(&mut self) -> Option<SysExEvent> {
        self.sysex_rx.pop().ok()
    }

    /// Drain all pending short messages in arrival order.
    pub fn drain_short(&mut self) -> impl Iterator<Item = MidiMessage> + '_ {
        std::iter::from_fn(|| self.recv_short())
    }

    /// Drain all pending SysEx messages in arrival order.
    pub fn drain_sysex(&mut self) -> impl Iterator<Item = SysExEvent> + '_ {
        std::iter::from_fn(|| self.recv_sysex())
    }

    /// Number of short messages waiting.
    pub fn short_pending(&self) -> usize {
        self.short_rx.slots()
    }

    /// Number of SysEx messages waiting.
    pub fn sysex_pending(&self) -> usize {
        self.sysex_rx.slots()
    }
}
