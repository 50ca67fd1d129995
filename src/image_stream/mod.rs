//! Throttled image stream
//!
//! Frames land in a [`FrameReader`] on the capture thread, are picked up by a
//! dedicated delivery thread, thinned by the skip interval, converted to the
//! transport format and handed to the consumer's [`ImageFrameSink`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::PixelFormat;

mod convert;
mod multiplexer;
mod reader;

pub use convert::{to_image_frame, to_rgb8, yuv420_to_rgb8};
pub use multiplexer::{FrameThrottle, ImageStreamMultiplexer};
pub use reader::{AcquiredFrame, FrameReader};

/// One plane as delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlane {
    pub bytes: Bytes,
    /// Zero for encoded planes
    pub row_stride: u32,
    /// Zero for encoded planes
    pub pixel_stride: u32,
}

/// A frame as delivered to the consumer
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<ImagePlane>,
    /// Clockwise rotation the consumer should apply to display the frame upright
    pub rotation_degrees: u32,
}

/// Consumer of image frames, called on the delivery thread
pub trait ImageFrameSink: Send + Sync {
    fn on_image_frame(&self, frame: ImageFrame);
}

impl<F> ImageFrameSink for F
where
    F: Fn(ImageFrame) + Send + Sync,
{
    fn on_image_frame(&self, frame: ImageFrame) {
        self(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageStreamState {
    /// Reader released; the stream cannot start
    Uninitialized,
    Inactive,
    Active,
}
