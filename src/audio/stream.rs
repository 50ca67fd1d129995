use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::input::{read_buffer_size, AudioSource, PcmInput};
use super::AudioChunkSink;
use crate::errors::{CaptureError, Result};
use crate::permissions::{self, Capability, PermissionProvider};
use crate::types::AudioStreamRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioStreamState {
    Inactive,
    Active,
}

struct ActiveAudio {
    input: Arc<dyn PcmInput>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Start/stop controller for the raw PCM stream
pub struct AudioStreamController {
    source: Arc<dyn AudioSource>,
    permissions: Arc<dyn PermissionProvider>,
    active: Option<ActiveAudio>,
}

impl AudioStreamController {
    pub fn new(source: Arc<dyn AudioSource>, permissions: Arc<dyn PermissionProvider>) -> Self {
        Self {
            source,
            permissions,
            active: None,
        }
    }

    pub fn state(&self) -> AudioStreamState {
        if self.active.is_some() {
            AudioStreamState::Active
        } else {
            AudioStreamState::Inactive
        }
    }

    pub fn start(&mut self, request: AudioStreamRequest, sink: Arc<dyn AudioChunkSink>) -> Result<()> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyStreaming(
                "audio streaming is already started".to_string(),
            ));
        }
        permissions::require(self.permissions.as_ref(), Capability::Microphone)?;
        if request.sample_rate == 0 {
            return Err(CaptureError::InvalidArgument("sample rate must be positive".to_string()));
        }

        let min = self.source.min_buffer_size(request.sample_rate)?;
        let buffer_size = read_buffer_size(min, request.buffer_size_kb);
        if buffer_size == 0 {
            return Err(CaptureError::InvalidArgument("audio buffer size must be positive".to_string()));
        }

        let input = self.source.open(request.sample_rate, buffer_size)?;
        let cancelled = Arc::new(AtomicBool::new(false));

        let thread = {
            let input = input.clone();
            let cancelled = cancelled.clone();
            std::thread::Builder::new()
                .name("crabcapture-audio".to_string())
                .spawn(move || read_loop(input, buffer_size, cancelled, sink))
        };
        let thread = match thread {
            Ok(handle) => handle,
            Err(e) => {
                input.stop();
                input.release();
                return Err(CaptureError::AudioError(format!("Failed to spawn audio thread: {}", e)));
            }
        };

        log::info!(
            "Audio stream started at {} Hz with a {} byte buffer",
            request.sample_rate,
            buffer_size
        );
        self.active = Some(ActiveAudio {
            input,
            cancelled,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Stop and release the input. Does nothing when inactive.
    pub fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.cancelled.store(true, Ordering::SeqCst);
        active.input.stop();
        if let Some(thread) = active.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio read thread panicked");
            }
        }
        active.input.release();
        log::info!("Audio stream stopped");
    }
}

impl Drop for AudioStreamController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(input: Arc<dyn PcmInput>, buffer_size: usize, cancelled: Arc<AtomicBool>, sink: Arc<dyn AudioChunkSink>) {
    let mut buf = vec![0u8; buffer_size];

    while !cancelled.load(Ordering::SeqCst) {
        match input.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                // A read that straddles stop() is discarded.
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                sink.on_audio_chunk(Bytes::copy_from_slice(&buf[..n]));
            }
            Err(e) => {
                if !cancelled.load(Ordering::SeqCst) {
                    log::error!("Audio read failed, ending stream: {}", e);
                }
                break;
            }
        }
    }
    log::debug!("Audio read loop exited");
}
