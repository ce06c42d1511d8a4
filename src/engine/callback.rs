//! Real-time callback bridge.
//!
//! Runs on the audio thread once per hardware buffer. It re-slices the
//! variable-size hardware buffer into the engine's fixed-size blocks, holds
//! output silent during the warm-up window, and fades in at the warm-up
//! boundary and out on the buffer where shutdown is observed.
//!
//! REAL-TIME SAFE: no allocation, no blocking locks, no logging. The engine is
//! reached with `try_lock`; the control thread only locks it while no stream
//! is running, so contention means something is wrong and the buffer is
//! rendered silent.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::processor::{ProcessBlock, SharedEngine};

/// Default engine block size in frames.
pub const DEFAULT_VECTOR_SIZE: usize = 64;

/// Default number of hardware buffers held silent after a stream starts.
///
/// With no warm-up the first buffer of a stream is the fade-in buffer.
pub const DEFAULT_WARM_UP_BUFFERS: u32 = 0;

/// Default multiplier applied to every output sample.
pub const DEFAULT_OUTPUT_GAIN: f32 = 1.0;

/// Flags shared between the stream manager and the audio thread.
///
/// The control thread writes `ending`; the audio thread writes `done`, the
/// elapsed-sample counter and the size of the last hardware buffer.
#[derive(Debug, Default)]
pub struct StreamFlags {
    ending: AtomicBool,
    done: AtomicBool,
    samples_elapsed: AtomicU64,
    busy_callbacks: AtomicU32,
    buffer_frames: AtomicU32,
}

impl StreamFlags {
    /// Fresh flags for a new stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the audio thread to fade out and acknowledge.
    pub fn request_end(&self) {
        self.ending.store(true, Ordering::Release);
    }

    /// Whether shutdown has been requested.
    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::Acquire)
    }

    /// Whether the audio thread has finished the shutdown fade.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Frames handed to the engine since the stream opened.
    pub fn samples_elapsed(&self) -> u64 {
        self.samples_elapsed.load(Ordering::Acquire)
    }

    /// Callbacks rendered silent because the engine was locked elsewhere.
    pub fn busy_callbacks(&self) -> u32 {
        self.busy_callbacks.load(Ordering::Relaxed)
    }

    /// Frames in the last hardware buffer the driver delivered, once one has
    /// arrived.
    pub fn buffer_size(&self) -> Option<u32> {
        match self.buffer_frames.load(Ordering::Relaxed) {
            0 => None,
            frames => Some(frames),
        }
    }
}

/// Tuning for the callback bridge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeConfig {
    /// Fixed engine block size in frames.
    pub vector_size: usize,
    /// Hardware buffers held silent before processing starts.
    pub warm_up_buffers: u32,
    /// Multiplier applied to every output sample.
    pub output_gain: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            vector_size: DEFAULT_VECTOR_SIZE,
            warm_up_buffers: DEFAULT_WARM_UP_BUFFERS,
            output_gain: DEFAULT_OUTPUT_GAIN,
        }
    }
}

/// Per-stream render state, moved into the audio callback.
pub struct CallbackBridge {
    engine: SharedEngine,
    flags: Arc<StreamFlags>,
    config: BridgeConfig,
    num_inputs: usize,
    num_outputs: usize,
    /// Position within the current engine block, always `< vector_size`.
    cursor: usize,
    /// Hardware buffers seen so far, capped one past `warm_up_buffers`.
    warm_up: u64,
    samples_elapsed: u64,
}

impl CallbackBridge {
    /// Create a bridge for a stream with the given engine channel counts.
    ///
    /// # Panics
    /// Panics if `config.vector_size` is zero.
    pub fn new(
        engine: SharedEngine,
        flags: Arc<StreamFlags>,
        config: BridgeConfig,
        num_inputs: usize,
        num_outputs: usize,
    ) -> Self {
        assert!(config.vector_size > 0, "vector size must be non-zero");
        Self {
            engine,
            flags,
            config,
            num_inputs,
            num_outputs,
            cursor: 0,
            warm_up: 0,
            samples_elapsed: 0,
        }
    }

    /// Engine input channel count.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Engine output channel count.
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Fixed engine block size.
    pub fn vector_size(&self) -> usize {
        self.config.vector_size
    }

    /// Record the size of the hardware buffer being rendered.
    ///
    /// Backends that render one device buffer in several chunks call this once
    /// per device buffer, with the full size.
    pub fn report_buffer_size(&self, frames: usize) {
        let frames = u32::try_from(frames).unwrap_or(u32::MAX);
        self.flags.buffer_frames.store(frames, Ordering::Relaxed);
    }

    /// Render one hardware buffer.
    ///
    /// `input` and `output` are planar: channel `c` occupies
    /// `c * frames..(c + 1) * frames`. Input is faded in place on the boundary
    /// buffers.
    ///
    /// Engine blocks start whenever the cursor wraps to zero. A block that
    /// would run past the end of this buffer is not processed here, and the
    /// frames it would have covered stay silent.
    pub fn render(&mut self, input: &mut [f32], output: &mut [f32], frames: usize) {
        let in_len = self.num_inputs * frames;
        let out_len = self.num_outputs * frames;
        if input.len() < in_len || output.len() < out_len {
            output.fill(0.0);
            return;
        }
        let input = &mut input[..in_len];
        let output = &mut output[..out_len];

        let ending = self.flags.is_ending();
        let warm_up_buffers = u64::from(self.config.warm_up_buffers);
        let warmed_up = self.warm_up >= warm_up_buffers;
        let do_fade = self.warm_up == warm_up_buffers || ending;

        if warmed_up && !self.flags.is_done() {
            self.render_active(input, output, frames, ending, do_fade);
        } else {
            output.fill(0.0);
            // still silent during warm-up, nothing to fade
            if ending {
                self.flags.done.store(true, Ordering::Release);
            }
        }

        self.warm_up = (self.warm_up + 1).min(warm_up_buffers + 1);
    }

    fn render_active(
        &mut self,
        input: &mut [f32],
        output: &mut [f32],
        frames: usize,
        ending: bool,
        do_fade: bool,
    ) {
        output.fill(0.0);

        let Ok(mut engine) = self.engine.try_lock() else {
            self.flags.busy_callbacks.fetch_add(1, Ordering::Relaxed);
            if ending {
                self.flags.done.store(true, Ordering::Release);
            }
            return;
        };

        if do_fade {
            apply_fade(input, self.num_inputs, frames, ending);
        }

        let vector_size = self.config.vector_size;
        let mut offset = (vector_size - self.cursor) % vector_size;
        while offset + vector_size <= frames {
            let mut block = ProcessBlock::new(
                input,
                output,
                self.num_inputs,
                self.num_outputs,
                frames,
                offset,
                vector_size,
            );
            engine.process(&mut block);
            self.samples_elapsed += vector_size as u64;
            offset += vector_size;
        }
        drop(engine);

        self.cursor = (self.cursor + frames) % vector_size;
        self.flags
            .samples_elapsed
            .store(self.samples_elapsed, Ordering::Release);

        if self.config.output_gain != 1.0 {
            for sample in output.iter_mut() {
                *sample *= self.config.output_gain;
            }
        }

        if do_fade {
            apply_fade(output, self.num_outputs, frames, ending);
        }

        if ending {
            self.flags.done.store(true, Ordering::Release);
        }
    }
}

/// Apply a linear ramp across `frames` to each planar channel.
///
/// Up ramps from 0 towards 1; down is the time-reverse, ending at 0.
pub fn apply_fade(buffer: &mut [f32], channels: usize, frames: usize, down: bool) {
    if frames == 0 {
        return;
    }
    let n = frames as f32;
    for channel in buffer.chunks_exact_mut(frames).take(channels) {
        for (j, sample) in channel.iter_mut().enumerate() {
            let gain = if down {
                (frames - (j + 1)) as f32 / n
            } else {
                j as f32 / n
            };
            *sample *= gain;
        }
    }
}
