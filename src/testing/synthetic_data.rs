//! Synthetic frames and PCM for offline tests and the simulated platform

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;

use crate::types::{CapturedFrame, PixelFormat, Plane, Size};

/// Packed RGB8 frame with a gradient that shifts every frame
pub fn synthetic_rgb_frame(sequence: u64, width: u32, height: u32) -> CapturedFrame {
    let base = (sequence % 256) as u8;
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push(base.wrapping_add((x % 256) as u8));
            data.push(base.wrapping_add((y % 256) as u8));
            data.push(base.wrapping_add(((x + y) % 256) as u8));
        }
    }

    CapturedFrame {
        sequence,
        timestamp_us: timestamp_for(sequence),
        width,
        height,
        format: PixelFormat::Rgb8,
        planes: vec![Plane::new(data, width * 3, 3)],
    }
}

/// YUV 4:2:0 frame with semi-planar (interleaved) chroma, the common camera layout.
///
/// U and V are views into one interleaved buffer with a pixel stride of 2.
pub fn synthetic_yuv_frame(sequence: u64, width: u32, height: u32) -> CapturedFrame {
    let base = (sequence % 256) as u8;
    let row: Vec<u8> = (0..width).map(|x| base.wrapping_add((x % 256) as u8)).collect();
    let mut luma = Vec::with_capacity((width * height) as usize);
    for _ in 0..height {
        luma.extend_from_slice(&row);
    }

    let chroma_w = width.div_ceil(2);
    let chroma_h = height.div_ceil(2);
    let mut uv = Vec::with_capacity((chroma_w * chroma_h * 2) as usize);
    for _ in 0..chroma_h * chroma_w {
        uv.push(128u8);
        uv.push(base);
    }
    let uv = Bytes::from(uv);
    let row_stride = chroma_w * 2;

    CapturedFrame {
        sequence,
        timestamp_us: timestamp_for(sequence),
        width,
        height,
        format: PixelFormat::Yuv420,
        planes: vec![
            Plane::new(luma, width, 1),
            Plane::new(uv.clone(), row_stride, 2),
            Plane::new(uv.slice(1..), row_stride, 2),
        ],
    }
}

/// Little-endian RGB565 frame
pub fn synthetic_rgb565_frame(sequence: u64, width: u32, height: u32) -> CapturedFrame {
    let value: u16 = ((sequence as u16 & 0x1f) << 11) | 0x07e0;
    let mut data = Vec::with_capacity((width * height * 2) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&value.to_le_bytes());
    }

    CapturedFrame {
        sequence,
        timestamp_us: timestamp_for(sequence),
        width,
        height,
        format: PixelFormat::Rgb565,
        planes: vec![Plane::new(data, width * 2, 2)],
    }
}

/// Camera-encoded JPEG frame
pub fn synthetic_jpeg_frame(sequence: u64, width: u32, height: u32) -> CapturedFrame {
    let rgb = synthetic_rgb_frame(sequence, width, height);
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, 75);
    if let Err(e) = encoder.encode(&rgb.planes[0].data, width, height, image::ExtendedColorType::Rgb8) {
        log::warn!("Synthetic JPEG encode failed: {}", e);
    }

    CapturedFrame {
        sequence,
        timestamp_us: timestamp_for(sequence),
        width,
        height,
        format: PixelFormat::Jpeg,
        planes: vec![Plane::new(buffer, 0, 0)],
    }
}

/// Frame of any supported layout
pub fn synthetic_frame(sequence: u64, size: Size, format: PixelFormat) -> CapturedFrame {
    match format {
        PixelFormat::Yuv420 => synthetic_yuv_frame(sequence, size.width, size.height),
        PixelFormat::Rgb565 => synthetic_rgb565_frame(sequence, size.width, size.height),
        PixelFormat::Rgb8 => synthetic_rgb_frame(sequence, size.width, size.height),
        PixelFormat::Jpeg => synthetic_jpeg_frame(sequence, size.width, size.height),
    }
}

/// Mono PCM16 sine chunk (440 Hz) of `samples` samples
pub fn synthetic_pcm_chunk(chunk_number: u64, samples: usize, sample_rate: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let t = (chunk_number as f64 * samples as f64 + i as f64) / sample_rate.max(1) as f64;
        let value = (2.0 * std::f64::consts::PI * 440.0 * t).sin() * 0.3;
        out.extend_from_slice(&((value * i16::MAX as f64) as i16).to_le_bytes());
    }
    out
}

fn timestamp_for(sequence: u64) -> u64 {
    // 30 fps spacing
    sequence * 33_333
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_frame_size() {
        let frame = synthetic_rgb_frame(0, 32, 16);
        assert_eq!(frame.size_bytes(), 32 * 16 * 3);
        assert_eq!(frame.planes[0].row_stride, 96);
    }

    #[test]
    fn test_yuv_frame_layout() {
        let frame = synthetic_yuv_frame(3, 8, 6);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].data.len(), 48);
        assert_eq!(frame.planes[1].pixel_stride, 2);
        assert_eq!(frame.planes[1].data[0], 128);
        assert_eq!(frame.planes[2].data[0], 3);
    }

    #[test]
    fn test_frames_differ() {
        let a = synthetic_rgb_frame(0, 8, 8);
        let b = synthetic_rgb_frame(1, 8, 8);
        assert_ne!(a.planes[0].data[0], b.planes[0].data[0]);
    }

    #[test]
    fn test_jpeg_frame_has_soi_marker() {
        let frame = synthetic_jpeg_frame(0, 16, 16);
        assert_eq!(&frame.planes[0].data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_pcm_chunk_length() {
        assert_eq!(synthetic_pcm_chunk(0, 480, 48000).len(), 960);
    }
}
