//! Engine module
//!
//! Stream management and the real-time paths into the processing engine.
//! Handles cpal integration, the audio callback bridge, and MIDI input/output.

pub mod audio_engine;
pub mod callback;
pub mod channels;
pub mod cpal_backend;
pub mod events;
pub mod midi_engine;
pub mod processor;

#[cfg(test)]
pub(crate) mod testing;

pub use audio_engine::{
    StreamManager, StreamManagerConfig, StreamState, StreamStatus, DEFAULT_SHUTDOWN_POLL_INTERVAL,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use callback::{
    apply_fade, BridgeConfig, CallbackBridge, StreamFlags, DEFAULT_OUTPUT_GAIN,
    DEFAULT_VECTOR_SIZE, DEFAULT_WARM_UP_BUFFERS,
};
pub use channels::{
    MidiQueues, MidiReceivers, MidiSenders, DEFAULT_SHORT_QUEUE_SIZE, DEFAULT_SYSEX_QUEUE_SIZE,
};
pub use cpal_backend::{driver_names, CpalBackend, CpalStream};
pub use events::{IncomingMidi, MidiMessage, SysExEvent, MAX_SYSEX_SIZE};
pub use midi_engine::{MidiEngine, MidiInputContext, MidiStats};
pub use processor::{Engine, PassThrough, ProcessBlock, SharedEngine};
