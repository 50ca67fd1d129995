//! Microphone input via cpal
//!
//! The cpal stream lives on its own thread for its whole lifetime; samples are
//! converted to mono PCM16 in the stream callback and handed over through a
//! bounded channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::input::{AudioSource, PcmInput, BYTES_PER_SAMPLE};
use crate::errors::{CaptureError, Result};
use crate::lock_unpoisoned;

/// Maximum number of callback chunks buffered before new ones are dropped.
const MAX_BUFFERED_CHUNKS: usize = 256;

const READ_POLL: Duration = Duration::from_millis(50);

/// Default input device of the default cpal host
#[derive(Debug, Default)]
pub struct CpalAudioSource;

impl CpalAudioSource {
    pub fn new() -> Self {
        Self
    }
}

impl AudioSource for CpalAudioSource {
    fn min_buffer_size(&self, sample_rate: u32) -> Result<usize> {
        // 20 ms of mono PCM16
        Ok((sample_rate as usize / 50).max(1) * BYTES_PER_SAMPLE)
    }

    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Arc<dyn PcmInput>> {
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(MAX_BUFFERED_CHUNKS);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("crabcapture-cpal".to_string())
            .spawn(move || stream_thread(sample_rate, chunk_tx, ready_tx, shutdown_rx))
            .map_err(|e| CaptureError::AudioError(format!("Failed to spawn cpal thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(CaptureError::AudioError("cpal thread exited during setup".to_string()));
            }
        }

        log::debug!("cpal input open, read buffer {} bytes", buffer_size);
        Ok(Arc::new(CpalInput {
            chunks: chunk_rx,
            pending: Mutex::new(Vec::with_capacity(buffer_size)),
            stopped: AtomicBool::new(false),
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }
}

fn stream_thread(
    sample_rate: u32,
    chunk_tx: Sender<Vec<u8>>,
    ready_tx: Sender<Result<()>>,
    shutdown_rx: Receiver<()>,
) {
    let stream = match build_stream(sample_rate, chunk_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::AudioError(format!("Failed to start stream: {}", e))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Blocks until stop() sends or drops the shutdown sender.
    let _ = shutdown_rx.recv();
    if let Err(e) = stream.pause() {
        log::warn!("Failed to pause audio stream: {}", e);
    }
    drop(stream);
}

fn build_stream(sample_rate: u32, chunk_tx: Sender<Vec<u8>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::AudioError("No default audio device".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::AudioError(format!("No supported config: {}", e)))?;

    let actual_rate = if sample_rate == 48000 || sample_rate == 44100 {
        sample_rate
    } else {
        log::warn!(
            "Sample rate {} not requested from device, using default {}",
            sample_rate,
            supported.sample_rate().0
        );
        supported.sample_rate().0
    };
    let channels = supported.channels().max(1);

    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(actual_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = chunk_tx.try_send(downmix_to_pcm16(data, channels as usize));
            },
            move |err| {
                log::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| CaptureError::AudioError(format!("Failed to build stream: {}", e)))
}

/// Average interleaved f32 frames down to mono little-endian i16.
fn downmix_to_pcm16(data: &[f32], channels: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / channels.max(1) * BYTES_PER_SAMPLE);
    for frame in data.chunks(channels.max(1)) {
        let mono = frame.iter().sum::<f32>() / frame.len() as f32;
        let sample = (mono.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

struct CpalInput {
    chunks: Receiver<Vec<u8>>,
    pending: Mutex<Vec<u8>>,
    stopped: AtomicBool,
    shutdown: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalInput {
    fn drain_pending(&self, buf: &mut [u8]) -> usize {
        let mut pending = lock_unpoisoned(&self.pending);
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        pending.drain(..n);
        n
    }
}

impl PcmInput for CpalInput {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let n = self.drain_pending(buf);
        if n > 0 {
            return Ok(n);
        }

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(CaptureError::AudioError("input stopped".to_string()));
            }
            match self.chunks.recv_timeout(READ_POLL) {
                Ok(chunk) => {
                    lock_unpoisoned(&self.pending).extend_from_slice(&chunk);
                    return Ok(self.drain_pending(buf));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::AudioError("audio stream closed".to_string()));
                }
            }
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        lock_unpoisoned(&self.shutdown).take();
    }

    fn release(&self) {
        self.stop();
        if let Some(thread) = lock_unpoisoned(&self.thread).take() {
            if thread.join().is_err() {
                log::error!("cpal stream thread panicked");
            }
        }
        lock_unpoisoned(&self.pending).clear();
    }
}
