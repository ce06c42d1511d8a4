//! cpal Backend
//!
//! [`AudioBackend`] over a cpal host. cpal hands out interleaved buffers on
//! separate input and output streams, so captured input travels to the output
//! callback through an rtrb ring and is de-interleaved there into planar
//! scratch buffers for the [`CallbackBridge`].

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use rtrb::{Consumer, RingBuffer};

use super::callback::CallbackBridge;
use crate::devices::{
    display_name, AudioBackend, AudioCatalog, AudioDeviceDescriptor, AudioStream, BackendFactory,
    ChannelRouting, DeviceId, DriverType, StreamRequest,
};
use crate::error::HostError;

/// Hardware buffers of captured input the ring can hold.
const INPUT_RING_BUFFERS: usize = 4;

/// Frames per buffer assumed for sizing when the driver picks the size.
const DRIVER_BUFFER_FRAMES: usize = 4096;

/// Ask for `requested` frames unless the device reports it cannot do that
/// size, in which case the driver picks one.
fn choose_buffer_size(requested: u32, supported: &SupportedBufferSize) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if requested < *min || requested > *max => {
            log::warn!(
                "Buffer size {} outside device range {}..={}, using driver default",
                requested,
                min,
                max
            );
            BufferSize::Default
        }
        _ => BufferSize::Fixed(requested),
    }
}

/// Frames a buffer of the given size may hold, for sizing scratch space.
fn buffer_capacity(buffer_size: BufferSize) -> usize {
    match buffer_size {
        BufferSize::Fixed(frames) => frames as usize,
        BufferSize::Default => DRIVER_BUFFER_FRAMES,
    }
}

/// Names of the cpal hosts available on this platform, indexed by driver code.
pub fn driver_names() -> Vec<&'static str> {
    cpal::available_hosts().iter().map(|id| id.name()).collect()
}

/// Audio backend for one cpal host.
pub struct CpalBackend {
    driver: DriverType,
    host: Host,
    /// Devices of the last probe, indexed by [`DeviceId`].
    devices: Vec<Device>,
}

impl CpalBackend {
    /// Create a backend for driver code `driver`.
    ///
    /// The code indexes [`driver_names`]; out-of-range codes and hosts that
    /// fail to initialise fall back to the platform default host.
    pub fn new(driver: DriverType) -> Self {
        let host = match cpal::available_hosts().get(driver.0 as usize) {
            Some(id) => cpal::host_from_id(*id).unwrap_or_else(|e| {
                log::warn!("Audio host {} unavailable ({}), using default", id.name(), e);
                cpal::default_host()
            }),
            None => cpal::default_host(),
        };
        log::info!("Using audio host {}", host.id().name());

        Self {
            driver,
            host,
            devices: Vec::new(),
        }
    }

    /// Factory that builds a cpal backend per driver type.
    pub fn factory() -> BackendFactory {
        Box::new(|driver: DriverType| {
            Ok(Box::new(CpalBackend::new(driver)) as Box<dyn AudioBackend>)
        })
    }

    fn device(&self, id: DeviceId) -> Result<&Device, HostError> {
        self.devices
            .get(id.0)
            .ok_or_else(|| HostError::StreamOpenFailed(format!("unknown device id {}", id.0)))
    }
}

impl AudioBackend for CpalBackend {
    fn driver(&self) -> DriverType {
        self.driver
    }

    fn probe(&mut self) -> Result<AudioCatalog, HostError> {
        let default_input = self.host.default_input_device().and_then(|d| d.name().ok());
        let default_output = self.host.default_output_device().and_then(|d| d.name().ok());

        self.devices = match self.host.devices() {
            Ok(devices) => devices.collect(),
            Err(e) => {
                log::error!("Audio device enumeration failed: {}", e);
                Vec::new()
            }
        };

        let host_name = self.host.id().name();
        let descriptors = self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let raw = device.name().unwrap_or_else(|_| "Unknown".to_string());
                AudioDeviceDescriptor {
                    id: DeviceId(index),
                    name: display_name(&raw, host_name).to_string(),
                    max_input_channels: device
                        .default_input_config()
                        .map(|c| c.channels())
                        .unwrap_or(0),
                    max_output_channels: device
                        .default_output_config()
                        .map(|c| c.channels())
                        .unwrap_or(0),
                    is_default_input: Some(&raw) == default_input.as_ref(),
                    is_default_output: Some(&raw) == default_output.as_ref(),
                }
            })
            .collect();

        Ok(AudioCatalog::new(descriptors))
    }

    fn shares_duplex_device(&self) -> bool {
        self.host.id().name() == "ASIO"
    }

    fn open_stream(
        &mut self,
        request: &StreamRequest,
        bridge: CallbackBridge,
    ) -> Result<Box<dyn AudioStream>, HostError> {
        let buffer_size = request.config.buffer_size;
        let max_frames = buffer_size as usize;
        let sample_rate = SampleRate(request.config.sample_rate);

        let output_device = self.device(request.config.output_device)?;
        let output_supported = output_device
            .default_output_config()
            .map_err(|e| HostError::StreamOpenFailed(e.to_string()))?;
        let output_channels = output_supported.channels();
        let output_buffer = choose_buffer_size(buffer_size, output_supported.buffer_size());

        let mut input_stream = None;
        let mut input_rx = None;
        let mut input_channels = 0;

        if request.routing.engine_inputs() > 0 {
            let input_device = self.device(request.config.input_device)?;
            if let Ok(supported) = input_device.default_input_config() {
                input_channels = supported.channels() as usize;
                let input_buffer = choose_buffer_size(buffer_size, supported.buffer_size());
                let config = StreamConfig {
                    channels: supported.channels(),
                    sample_rate,
                    buffer_size: input_buffer,
                };

                let ring_frames = buffer_capacity(input_buffer).max(max_frames);
                let (mut producer, consumer) =
                    RingBuffer::<f32>::new(ring_frames * input_channels * INPUT_RING_BUFFERS);
                let stream = input_device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            // REAL-TIME SAFE: overflowing samples are dropped
                            for &sample in data {
                                if producer.push(sample).is_err() {
                                    break;
                                }
                            }
                        },
                        move |err| {
                            log::error!("Audio input stream error: {}", err);
                        },
                        None,
                    )
                    .map_err(|e| HostError::StreamOpenFailed(e.to_string()))?;

                input_stream = Some(stream);
                input_rx = Some(consumer);
            } else {
                log::warn!("Input device has no input configuration, input is silent");
            }
        }

        let mut renderer = OutputRenderer::new(
            bridge,
            input_rx,
            input_channels,
            output_channels as usize,
            request.routing.clone(),
            max_frames,
        );

        let config = StreamConfig {
            channels: output_channels,
            sample_rate,
            buffer_size: output_buffer,
        };
        let output_stream = output_device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render(data);
                },
                move |err| {
                    log::error!("Audio output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| HostError::StreamOpenFailed(e.to_string()))?;

        Ok(Box::new(CpalStream {
            input: input_stream,
            output: Some(output_stream),
            buffer_size,
        }))
    }
}

/// Input and output cpal streams of one host stream.
pub struct CpalStream {
    input: Option<Stream>,
    output: Option<Stream>,
    /// Requested size; cpal only reveals the real one inside the callback.
    buffer_size: u32,
}

impl AudioStream for CpalStream {
    fn start(&mut self) -> Result<(), HostError> {
        if let Some(input) = &self.input {
            input
                .play()
                .map_err(|e| HostError::StreamOpenFailed(e.to_string()))?;
        }
        if let Some(output) = &self.output {
            output
                .play()
                .map_err(|e| HostError::StreamOpenFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        for stream in [self.output.take(), self.input.take()].into_iter().flatten() {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause audio stream: {}", e);
            }
        }
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }
}

/// State of the output callback: scratch buffers sized at open.
struct OutputRenderer {
    bridge: CallbackBridge,
    input: Option<Consumer<f32>>,
    input_channels: usize,
    output_channels: usize,
    routing: ChannelRouting,
    max_frames: usize,
    captured: Vec<f32>,
    planar_in: Vec<f32>,
    planar_out: Vec<f32>,
}

impl OutputRenderer {
    fn new(
        bridge: CallbackBridge,
        input: Option<Consumer<f32>>,
        input_channels: usize,
        output_channels: usize,
        routing: ChannelRouting,
        max_frames: usize,
    ) -> Self {
        let max_frames = max_frames.max(1);
        Self {
            captured: vec![0.0; max_frames * input_channels],
            planar_in: vec![0.0; max_frames * routing.engine_inputs()],
            planar_out: vec![0.0; max_frames * routing.engine_outputs()],
            bridge,
            input,
            input_channels,
            output_channels,
            routing,
            max_frames,
        }
    }

    /// Render one interleaved device buffer.
    ///
    /// REAL-TIME SAFE: buffers larger than the scratch space are rendered as
    /// consecutive chunks.
    fn render(&mut self, data: &mut [f32]) {
        if self.output_channels == 0 {
            return;
        }
        self.bridge.report_buffer_size(data.len() / self.output_channels);
        let chunk_len = self.max_frames * self.output_channels;
        for chunk in data.chunks_mut(chunk_len) {
            let frames = chunk.len() / self.output_channels;
            self.render_chunk(chunk, frames);
        }
    }

    fn render_chunk(&mut self, chunk: &mut [f32], frames: usize) {
        let in_ch = self.input_channels;
        let out_ch = self.output_channels;

        let captured = &mut self.captured[..frames * in_ch];
        match self.input.as_mut() {
            Some(rx) => {
                for sample in captured.iter_mut() {
                    *sample = rx.pop().unwrap_or(0.0);
                }
            }
            None => captured.fill(0.0),
        }

        let planar_in = &mut self.planar_in[..self.routing.inputs.len() * frames];
        for (channel, &hw) in self.routing.inputs.iter().enumerate() {
            let dst = &mut planar_in[channel * frames..(channel + 1) * frames];
            if hw < in_ch {
                for (frame, sample) in dst.iter_mut().enumerate() {
                    *sample = captured[frame * in_ch + hw];
                }
            } else {
                dst.fill(0.0);
            }
        }

        let planar_out = &mut self.planar_out[..self.routing.outputs.len() * frames];
        self.bridge.render(planar_in, planar_out, frames);

        chunk.fill(0.0);
        for (channel, &hw) in self.routing.outputs.iter().enumerate() {
            if hw >= out_ch {
                continue;
            }
            let src = &planar_out[channel * frames..(channel + 1) * frames];
            for (frame, &sample) in src.iter().enumerate() {
                chunk[frame * out_ch + hw] = sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::callback::{BridgeConfig, StreamFlags};
    use crate::engine::processor::PassThrough;
    use std::sync::{Arc, Mutex};

    fn renderer(
        routing: ChannelRouting,
        input_channels: usize,
        output_channels: usize,
        max_frames: usize,
    ) -> (OutputRenderer, rtrb::Producer<f32>, Arc<StreamFlags>) {
        let flags = Arc::new(StreamFlags::new());
        let bridge = CallbackBridge::new(
            Arc::new(Mutex::new(PassThrough::new())),
            Arc::clone(&flags),
            BridgeConfig::default(),
            routing.engine_inputs(),
            routing.engine_outputs(),
        );
        let (producer, consumer) = RingBuffer::new(4096);
        let renderer = OutputRenderer::new(
            bridge,
            Some(consumer),
            input_channels,
            output_channels,
            routing,
            max_frames,
        );
        (renderer, producer, flags)
    }

    fn push_frames(producer: &mut rtrb::Producer<f32>, frames: usize, frame: &[f32]) {
        for _ in 0..frames {
            for &sample in frame {
                producer.push(sample).unwrap();
            }
        }
    }

    #[test]
    fn test_routes_channels_through_engine() {
        let routing = ChannelRouting {
            inputs: vec![1, 0],
            outputs: vec![2, 3],
        };
        let (mut renderer, mut producer, _flags) = renderer(routing, 2, 4, 64);

        // First buffer carries the fade-in
        push_frames(&mut producer, 64, &[0.25, 0.75]);
        let mut data = vec![0.0; 64 * 4];
        renderer.render(&mut data);

        push_frames(&mut producer, 64, &[0.25, 0.75]);
        let mut data = vec![9.0; 64 * 4];
        renderer.render(&mut data);

        for frame in data.chunks_exact(4) {
            assert_eq!(frame, &[0.0, 0.0, 0.75, 0.25]);
        }
    }

    #[test]
    fn test_large_buffers_render_in_chunks() {
        let routing = ChannelRouting {
            inputs: vec![0],
            outputs: vec![0],
        };
        let (mut renderer, mut producer, flags) = renderer(routing, 1, 1, 64);

        push_frames(&mut producer, 256, &[0.5]);
        let mut data = vec![0.0; 256];
        renderer.render(&mut data);

        // Four chunks, only the first one faded in
        assert_eq!(flags.samples_elapsed(), 256);
        assert_eq!(flags.buffer_size(), Some(256));
        assert!(data[64..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_reports_delivered_buffer_size() {
        let routing = ChannelRouting {
            inputs: vec![],
            outputs: vec![0, 1],
        };
        let (mut renderer, _producer, flags) = renderer(routing, 0, 2, 512);
        assert_eq!(flags.buffer_size(), None);

        let mut data = vec![0.0; 441 * 2];
        renderer.render(&mut data);
        assert_eq!(flags.buffer_size(), Some(441));
    }

    #[test]
    fn test_buffer_size_outside_range_uses_driver_default() {
        let range = SupportedBufferSize::Range { min: 64, max: 2048 };
        assert_eq!(choose_buffer_size(512, &range), BufferSize::Fixed(512));
        assert_eq!(choose_buffer_size(4096, &range), BufferSize::Default);
        assert_eq!(choose_buffer_size(32, &range), BufferSize::Default);
        assert_eq!(
            choose_buffer_size(256, &SupportedBufferSize::Unknown),
            BufferSize::Fixed(256)
        );
        assert_eq!(buffer_capacity(BufferSize::Default), DRIVER_BUFFER_FRAMES);
    }

    #[test]
    fn test_missing_input_is_silent() {
        let routing = ChannelRouting {
            inputs: vec![0, 5],
            outputs: vec![0, 1],
        };
        let (mut renderer, mut producer, _flags) = renderer(routing, 2, 2, 64);

        push_frames(&mut producer, 128, &[0.5, 0.5]);
        let mut data = vec![0.0; 128];
        renderer.render(&mut data);
        let mut data = vec![0.0; 128];
        renderer.render(&mut data);

        for frame in data.chunks_exact(2) {
            assert_eq!(frame, &[0.5, 0.0]);
        }
    }

    #[test]
    fn test_input_underrun_reads_silence() {
        let routing = ChannelRouting {
            inputs: vec![0],
            outputs: vec![0],
        };
        let (mut renderer, _producer, _flags) = renderer(routing, 1, 1, 64);
        let mut data = vec![0.3; 64];
        renderer.render(&mut data);
        assert!(data.iter().all(|&s| s == 0.0));
    }
}
