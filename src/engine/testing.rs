//! Test doubles for the audio backend.
//!
//! A scripted catalog of two devices ("Built-in" and "Interface") and a
//! stream whose callbacks are driven by a thread, like a driver would.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::callback::CallbackBridge;
use crate::devices::{
    AudioBackend, AudioCatalog, AudioDeviceDescriptor, AudioStream, BackendFactory, DeviceId,
    DriverType, StreamRequest,
};
use crate::error::HostError;

/// Behaviour of the fake backend.
#[derive(Clone, Default)]
pub(crate) struct Script {
    pub fail_open: bool,
    pub silent_stream: bool,
    pub defaults: bool,
    /// Frames per callback, when the driver ignores the requested size.
    pub delivered_frames: Option<usize>,
    pub opened: Arc<Mutex<Vec<StreamRequest>>>,
    pub built: Arc<AtomicUsize>,
}

pub(crate) struct FakeBackend {
    driver: DriverType,
    script: Script,
}

impl AudioBackend for FakeBackend {
    fn driver(&self) -> DriverType {
        self.driver
    }

    fn probe(&mut self) -> Result<AudioCatalog, HostError> {
        let device = |id: usize, name: &str| AudioDeviceDescriptor {
            id: DeviceId(id),
            name: name.to_string(),
            max_input_channels: 2,
            max_output_channels: 2,
            is_default_input: self.script.defaults && id == 0,
            is_default_output: self.script.defaults && id == 0,
        };
        Ok(AudioCatalog::new(vec![device(0, "Built-in"), device(1, "Interface")]))
    }

    fn open_stream(
        &mut self,
        request: &StreamRequest,
        bridge: CallbackBridge,
    ) -> Result<Box<dyn AudioStream>, HostError> {
        if self.script.fail_open {
            return Err(HostError::StreamOpenFailed("device busy".to_string()));
        }
        self.script.opened.lock().unwrap().push(request.clone());
        Ok(Box::new(FakeStream {
            bridge: Some(bridge),
            frames: request.config.buffer_size as usize,
            delivered: self.script.delivered_frames,
            silent: self.script.silent_stream,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

/// Delivers callbacks from a thread, like a driver would.
pub(crate) struct FakeStream {
    bridge: Option<CallbackBridge>,
    frames: usize,
    delivered: Option<usize>,
    silent: bool,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioStream for FakeStream {
    fn start(&mut self) -> Result<(), HostError> {
        let Some(mut bridge) = self.bridge.take() else {
            return Ok(());
        };
        if self.silent {
            return Ok(());
        }
        let stop = Arc::clone(&self.stop);
        let frames = self.delivered.unwrap_or(self.frames);
        self.worker = Some(thread::spawn(move || {
            let mut input = vec![0.5; bridge.num_inputs() * frames];
            let mut output = vec![0.0; bridge.num_outputs() * frames];
            while !stop.load(Ordering::Acquire) {
                bridge.report_buffer_size(frames);
                bridge.render(&mut input, &mut output, frames);
                thread::sleep(Duration::from_millis(1));
            }
        }));
        Ok(())
    }

    fn abort(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn buffer_size(&self) -> u32 {
        self.frames as u32
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Factory building fake backends that follow `script`.
pub(crate) fn factory(script: Script) -> BackendFactory {
    Box::new(move |driver: DriverType| {
        script.built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBackend {
            driver,
            script: script.clone(),
        }) as Box<dyn AudioBackend>)
    })
}

