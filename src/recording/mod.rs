//! Video recording
//!
//! The pipeline drives a [`MediaRecorder`] through [`VideoRecordingController`].
//! With the `recording` feature, [`Mp4RecorderFactory`] encodes H.264 with
//! openh264 and muxes MP4 with muxide.

mod config;
mod controller;
#[cfg(feature = "recording")]
mod encoder;
#[cfg(feature = "recording")]
mod mp4;

pub use config::{unique_output_path, Container, RecorderSettings, VideoRecordRequest};
pub use controller::{
    EventOutcome, MediaRecorder, RecorderEvent, RecorderEvents, RecorderFactory, RecordingState,
    VideoRecordingController,
};
#[cfg(feature = "recording")]
pub use encoder::{EncodedFrame, H264Encoder};
#[cfg(feature = "recording")]
pub use mp4::Mp4RecorderFactory;
