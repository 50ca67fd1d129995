//! Testing utilities for CrabCapture
//!
//! Synthetic frames plus channel-backed sinks so tests can wait on deliveries
//! from the image-stream and audio threads.

pub mod synthetic_data;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::AudioChunkSink;
use crate::image_stream::{ImageFrame, ImageFrameSink};

pub use synthetic_data::{
    synthetic_frame, synthetic_jpeg_frame, synthetic_pcm_chunk, synthetic_rgb565_frame, synthetic_rgb_frame,
    synthetic_yuv_frame,
};

struct ChannelSink<T>(Sender<T>);

impl ImageFrameSink for ChannelSink<ImageFrame> {
    fn on_image_frame(&self, frame: ImageFrame) {
        let _ = self.0.send(frame);
    }
}

impl AudioChunkSink for ChannelSink<Bytes> {
    fn on_audio_chunk(&self, chunk: Bytes) {
        let _ = self.0.send(chunk);
    }
}

/// Image sink forwarding every frame into a channel
pub fn image_channel() -> (Arc<dyn ImageFrameSink>, Receiver<ImageFrame>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Arc::new(ChannelSink(tx)), rx)
}

/// Audio sink forwarding every chunk into a channel
pub fn audio_channel() -> (Arc<dyn AudioChunkSink>, Receiver<Bytes>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Arc::new(ChannelSink(tx)), rx)
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
