//! Engine boundary.
//!
//! The signal-processing engine is owned by the host process and only driven
//! through the [`Engine`] trait: configure block size and sample rate, reset,
//! and process one fixed-size block. Blocks are bounds-checked views into the
//! planar hardware buffer, so the engine never sees raw pointers.

use std::sync::{Arc, Mutex};

/// A fixed-block processing engine.
pub trait Engine: Send {
    /// Set the fixed number of frames every [`Engine::process`] call receives.
    fn set_block_size(&mut self, block_size: usize);

    /// Set the sample rate in Hz.
    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Clear internal state before a stream starts.
    fn on_reset(&mut self);

    /// Process one block. Output channels arrive zeroed.
    ///
    /// REAL-TIME SAFE: called on the audio thread, must not block or allocate.
    fn process(&mut self, block: &mut ProcessBlock<'_>);
}

/// Engine shared between the control thread (configuration while no stream
/// is running) and the audio callback.
pub type SharedEngine = Arc<Mutex<dyn Engine>>;

/// One fixed-size block over a planar hardware buffer.
///
/// The hardware buffer holds each channel contiguously, `stride` frames per
/// channel. The block covers frames `offset..offset + frames` of every channel.
pub struct ProcessBlock<'a> {
    inputs: &'a [f32],
    outputs: &'a mut [f32],
    num_inputs: usize,
    num_outputs: usize,
    stride: usize,
    offset: usize,
    frames: usize,
}

impl<'a> ProcessBlock<'a> {
    /// Create a block view.
    ///
    /// # Panics
    /// Panics if the buffers are too short for the channel counts and the
    /// block range, or if the range extends past `stride`.
    pub fn new(
        inputs: &'a [f32],
        outputs: &'a mut [f32],
        num_inputs: usize,
        num_outputs: usize,
        stride: usize,
        offset: usize,
        frames: usize,
    ) -> Self {
        assert!(offset + frames <= stride, "block range exceeds hardware buffer");
        assert!(inputs.len() >= num_inputs * stride, "input buffer too short");
        assert!(outputs.len() >= num_outputs * stride, "output buffer too short");
        Self {
            inputs,
            outputs,
            num_inputs,
            num_outputs,
            stride,
            offset,
            frames,
        }
    }

    /// Number of frames in this block.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of input channels.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Number of output channels.
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Samples of one input channel.
    pub fn input(&self, channel: usize) -> &'a [f32] {
        assert!(channel < self.num_inputs, "input channel out of range");
        let start = channel * self.stride + self.offset;
        &self.inputs[start..start + self.frames]
    }

    /// Samples of one output channel.
    pub fn output(&mut self, channel: usize) -> &mut [f32] {
        assert!(channel < self.num_outputs, "output channel out of range");
        let start = channel * self.stride + self.offset;
        &mut self.outputs[start..start + self.frames]
    }
}

/// Copies input channel `n` to output channel `n`.
///
/// Extra output channels stay silent. Used by the standalone binary and as a
/// reference engine in tests.
#[derive(Debug, Default)]
pub struct PassThrough {
    block_size: usize,
    sample_rate: f64,
}

impl PassThrough {
    /// Create a pass-through engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// The block size last configured by the host.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The sample rate last configured by the host.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

impl Engine for PassThrough {
    fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn on_reset(&mut self) {}

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        let channels = block.num_inputs().min(block.num_outputs());
        for channel in 0..channels {
            let input = block.input(channel);
            block.output(channel).copy_from_slice(input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_views_channel_slices() {
        // Two channels, 8 frames each, block of 4 at offset 4
        let inputs: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut outputs = vec![0.0; 16];
        let block = ProcessBlock::new(&inputs, &mut outputs, 2, 2, 8, 4, 4);

        assert_eq!(block.frames(), 4);
        assert_eq!(block.input(0), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(block.input(1), &[12.0, 13.0, 14.0, 15.0]);
    }

    #[test]
    fn test_pass_through_copies_block() {
        let inputs: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut outputs = vec![0.0; 16];
        {
            let mut block = ProcessBlock::new(&inputs, &mut outputs, 2, 2, 8, 0, 4);
            PassThrough::new().process(&mut block);
        }
        assert_eq!(&outputs[0..4], &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(&outputs[4..8], &[0.0; 4]);
        assert_eq!(&outputs[8..12], &[8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_pass_through_without_inputs() {
        let inputs: Vec<f32> = Vec::new();
        let mut outputs = vec![0.5; 8];
        {
            let mut block = ProcessBlock::new(&inputs, &mut outputs, 0, 2, 4, 0, 4);
            PassThrough::new().process(&mut block);
        }
        assert_eq!(outputs, vec![0.5; 8]);
    }

    #[test]
    #[should_panic(expected = "block range exceeds hardware buffer")]
    fn test_block_out_of_range_panics() {
        let inputs = vec![0.0; 8];
        let mut outputs = vec![0.0; 8];
        let _ = ProcessBlock::new(&inputs, &mut outputs, 1, 1, 8, 6, 4);
    }

    #[test]
    fn test_engine_configuration() {
        let mut engine = PassThrough::new();
        engine.set_block_size(64);
        engine.set_sample_rate(48000.0);
        assert_eq!(engine.block_size(), 64);
        assert_eq!(engine.sample_rate(), 48000.0);
    }
}
