//! Shared value types exchanged between the host, the pipeline and the platform adapters.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::CrabCaptureConfig;
use crate::negotiation::SupportedSize;

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Direction the lens points relative to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// Pixel layout of a captured frame or of an output target's buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Three planes (Y, U, V); chroma planes may be interleaved via pixel stride
    Yuv420,
    /// Packed 16-bit RGB
    Rgb565,
    /// Packed 24-bit RGB
    Rgb8,
    /// Single plane holding a JPEG bitstream
    Jpeg,
}

impl PixelFormat {
    /// Parse the reader format names used by host requests.
    ///
    /// Unknown names resolve to `None`; callers fall back to YUV.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "YUV_420_888" | "YUV420" | "I420" => Some(PixelFormat::Yuv420),
            "RGB_565" | "RGB565" => Some(PixelFormat::Rgb565),
            "RGB8" | "RGB_888" | "RGB24" => Some(PixelFormat::Rgb8),
            "JPEG" | "MJPEG" => Some(PixelFormat::Jpeg),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420 => "YUV_420_888",
            PixelFormat::Rgb565 => "RGB_565",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Jpeg => "JPEG",
        }
    }

    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv420 => 3,
            PixelFormat::Rgb565 | PixelFormat::Rgb8 | PixelFormat::Jpeg => 1,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::Yuv420
    }
}

/// One plane of a captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Bytes,
    pub row_stride: u32,
    pub pixel_stride: u32,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, row_stride: u32, pixel_stride: u32) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }
}

/// A frame as delivered by the camera driver to an output target.
///
/// Plane payloads are reference counted, so fanning a frame out to several
/// targets does not copy pixel data.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

impl CapturedFrame {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn size_bytes(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }
}

/// Request to open a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraRequest {
    pub camera_index: usize,
    pub video_size: Size,
    pub video_frame_rate: u32,
    pub image_stream_format: PixelFormat,
}

impl CameraRequest {
    pub fn new(camera_index: usize, video_size: Size, video_frame_rate: u32) -> Self {
        Self {
            camera_index,
            video_size,
            video_frame_rate,
            image_stream_format: PixelFormat::Yuv420,
        }
    }

    pub fn with_image_stream_format(mut self, format: PixelFormat) -> Self {
        self.image_stream_format = format;
        self
    }

    pub fn from_config(config: &CrabCaptureConfig) -> Self {
        let [width, height] = config.camera.video_size;
        Self {
            camera_index: config.camera.camera_index,
            video_size: Size::new(width, height),
            video_frame_rate: config.camera.frame_rate,
            image_stream_format: PixelFormat::from_name(&config.image_stream.format)
                .unwrap_or_default(),
        }
    }
}

/// Result of a successful `open`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraData {
    pub texture_id: i64,
    pub video_size: Size,
    pub video_frame_rate: u32,
    pub supported_sizes: Vec<SupportedSize>,
    pub supported_fps: Vec<u32>,
}

/// Encoding applied to image-stream frames before they reach the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportFormat {
    /// Per-plane byte buffers with stride metadata
    Planar,
    /// A single JPEG-encoded plane
    Jpeg { quality: u8 },
}

impl TransportFormat {
    pub fn from_name(name: &str, jpeg_quality: u8) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "planar" | "raw" => Some(TransportFormat::Planar),
            "jpeg" | "jpg" => Some(TransportFormat::Jpeg {
                quality: jpeg_quality,
            }),
            _ => None,
        }
    }
}

/// Request to start the throttled image stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamRequest {
    pub frame_skip_interval: u32,
    pub transport: TransportFormat,
}

impl ImageStreamRequest {
    pub fn new(frame_skip_interval: u32) -> Self {
        Self {
            frame_skip_interval,
            transport: TransportFormat::Planar,
        }
    }

    pub fn with_transport(mut self, transport: TransportFormat) -> Self {
        self.transport = transport;
        self
    }

    pub fn from_config(config: &CrabCaptureConfig) -> Self {
        let section = &config.image_stream;
        Self {
            frame_skip_interval: section.frame_skip_interval,
            transport: TransportFormat::from_name(&section.transport, section.jpeg_quality)
                .unwrap_or(TransportFormat::Planar),
        }
    }
}

/// Request to start the raw PCM audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamRequest {
    pub sample_rate: u32,
    pub buffer_size_kb: u32,
}

impl AudioStreamRequest {
    pub fn new(sample_rate: u32, buffer_size_kb: u32) -> Self {
        Self {
            sample_rate,
            buffer_size_kb,
        }
    }

    pub fn from_config(config: &CrabCaptureConfig) -> Self {
        Self {
            sample_rate: config.audio.sample_rate,
            buffer_size_kb: config.audio.buffer_size_kb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::from_name("YUV_420_888"), Some(PixelFormat::Yuv420));
        assert_eq!(PixelFormat::from_name("rgb_565"), Some(PixelFormat::Rgb565));
        assert_eq!(PixelFormat::from_name("JPEG"), Some(PixelFormat::Jpeg));
        assert_eq!(PixelFormat::from_name("NV99"), None);
        assert_eq!(PixelFormat::Yuv420.plane_count(), 3);
    }

    #[test]
    fn test_camera_data_serializes_camel_case() {
        let data = CameraData {
            texture_id: 7,
            video_size: Size::new(1280, 720),
            video_frame_rate: 30,
            supported_sizes: vec![],
            supported_fps: vec![15, 30],
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("textureId"));
        assert!(json.contains("videoFrameRate"));
        assert!(json.contains("supportedFps"));
    }

    #[test]
    fn test_transport_names() {
        assert_eq!(
            TransportFormat::from_name("jpeg", 70),
            Some(TransportFormat::Jpeg { quality: 70 })
        );
        assert_eq!(TransportFormat::from_name("planar", 70), Some(TransportFormat::Planar));
        assert_eq!(TransportFormat::from_name("webp", 70), None);
    }

    #[test]
    fn test_requests_from_default_config() {
        let config = CrabCaptureConfig::default();
        let camera = CameraRequest::from_config(&config);
        assert_eq!(camera.video_size, Size::new(1280, 720));
        assert_eq!(camera.video_frame_rate, 30);

        let stream = ImageStreamRequest::from_config(&config);
        assert_eq!(stream.frame_skip_interval, 1);
        assert_eq!(stream.transport, TransportFormat::Planar);

        let audio = AudioStreamRequest::from_config(&config);
        assert_eq!(audio.sample_rate, 44100);
    }
}
