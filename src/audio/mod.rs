//! Raw PCM audio streaming for CrabCapture
//!
//! Audio runs on its own read thread, independent of the camera pipeline.
//!
//! Submodules:
//! - `input`: PCM input and audio source contracts
//! - `stream`: the start/stop controller and its read loop
//! - `cpal_input`: microphone input via cpal (feature `audio`)

use bytes::Bytes;

#[cfg(feature = "audio")]
mod cpal_input;
mod input;
mod stream;

#[cfg(feature = "audio")]
pub use cpal_input::CpalAudioSource;
pub use input::{read_buffer_size, AudioSource, PcmInput, BYTES_PER_SAMPLE};
pub use stream::{AudioStreamController, AudioStreamState};

/// Consumer of PCM chunks, called on the audio read thread
pub trait AudioChunkSink: Send + Sync {
    fn on_audio_chunk(&self, chunk: Bytes);
}

impl<F> AudioChunkSink for F
where
    F: Fn(Bytes) + Send + Sync,
{
    fn on_audio_chunk(&self, chunk: Bytes) {
        self(chunk)
    }
}
