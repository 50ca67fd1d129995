//! Captured frame to transport conversion

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;

use super::{ImageFrame, ImagePlane};
use crate::errors::{CaptureError, Result};
use crate::types::{CapturedFrame, PixelFormat, Plane, TransportFormat};

/// Convert a frame for delivery, tagging it with the corrective rotation.
pub fn to_image_frame(frame: &CapturedFrame, rotation_degrees: u32, transport: TransportFormat) -> Result<ImageFrame> {
    if frame.planes.len() != frame.format.plane_count() {
        return Err(CaptureError::ConversionError(format!(
            "{} frame has {} planes, expected {}",
            frame.format.name(),
            frame.planes.len(),
            frame.format.plane_count()
        )));
    }
    if frame.planes.iter().any(|p| p.data.is_empty()) {
        return Err(CaptureError::ConversionError(format!(
            "frame {} has an empty plane",
            frame.sequence
        )));
    }

    let (format, planes) = match transport {
        TransportFormat::Planar => (
            frame.format,
            frame
                .planes
                .iter()
                .map(|p| ImagePlane {
                    bytes: Bytes::copy_from_slice(&p.data),
                    row_stride: p.row_stride,
                    pixel_stride: p.pixel_stride,
                })
                .collect(),
        ),
        TransportFormat::Jpeg { quality } => {
            let jpeg = encode_jpeg(frame, quality)?;
            (
                PixelFormat::Jpeg,
                vec![ImagePlane {
                    bytes: jpeg,
                    row_stride: 0,
                    pixel_stride: 0,
                }],
            )
        }
    };

    Ok(ImageFrame {
        sequence: frame.sequence,
        width: frame.width,
        height: frame.height,
        format,
        planes,
        rotation_degrees,
    })
}

fn encode_jpeg(frame: &CapturedFrame, quality: u8) -> Result<Bytes> {
    if frame.format == PixelFormat::Jpeg {
        // Already encoded by the camera.
        return Ok(Bytes::copy_from_slice(&frame.planes[0].data));
    }
    let rgb = to_rgb8(frame)?;

    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode(&rgb, frame.width, frame.height, image::ExtendedColorType::Rgb8)
        .map_err(|e| CaptureError::ConversionError(format!("JPEG encoding failed: {}", e)))?;
    Ok(Bytes::from(buffer))
}

/// Packed RGB8 pixels of any captured layout
pub fn to_rgb8(frame: &CapturedFrame) -> Result<Vec<u8>> {
    let plane = frame
        .planes
        .first()
        .ok_or_else(|| CaptureError::ConversionError("frame has no planes".to_string()))?;
    match frame.format {
        PixelFormat::Rgb8 => packed_rgb8(plane, frame.width, frame.height),
        PixelFormat::Rgb565 => rgb565_to_rgb8(plane, frame.width, frame.height),
        PixelFormat::Yuv420 => yuv420_to_rgb8(frame),
        PixelFormat::Jpeg => {
            let decoded = image::load_from_memory_with_format(&plane.data, image::ImageFormat::Jpeg)
                .map_err(|e| CaptureError::ConversionError(format!("JPEG decoding failed: {}", e)))?;
            Ok(decoded.to_rgb8().into_raw())
        }
    }
}

fn out_of_bounds(what: &str) -> CaptureError {
    CaptureError::ConversionError(format!("{} plane shorter than its strides imply", what))
}

fn packed_rgb8(plane: &Plane, width: u32, height: u32) -> Result<Vec<u8>> {
    let row_bytes = width as usize * 3;
    let stride = (plane.row_stride as usize).max(row_bytes);
    let mut out = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        let row = plane.data.get(start..start + row_bytes).ok_or_else(|| out_of_bounds("RGB"))?;
        out.extend_from_slice(row);
    }
    Ok(out)
}

fn rgb565_to_rgb8(plane: &Plane, width: u32, height: u32) -> Result<Vec<u8>> {
    let stride = (plane.row_stride as usize).max(width as usize * 2);
    let mut out = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let i = y * stride + x * 2;
            let px = plane.data.get(i..i + 2).ok_or_else(|| out_of_bounds("RGB565"))?;
            let v = u16::from_le_bytes([px[0], px[1]]);
            let r = ((v >> 11) & 0x1f) as u8;
            let g = ((v >> 5) & 0x3f) as u8;
            let b = (v & 0x1f) as u8;
            out.extend_from_slice(&[(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]);
        }
    }
    Ok(out)
}

/// BT.601 full-range YUV 4:2:0 to packed RGB8, honouring row and pixel strides.
pub fn yuv420_to_rgb8(frame: &CapturedFrame) -> Result<Vec<u8>> {
    let [y_plane, u_plane, v_plane] = match frame.planes.as_slice() {
        [y, u, v] => [y, u, v],
        _ => {
            return Err(CaptureError::ConversionError(
                "YUV frame needs three planes".to_string(),
            ))
        }
    };

    let sample = |plane: &Plane, x: usize, y: usize, what: &str| -> Result<f32> {
        let index = y * plane.row_stride as usize + x * plane.pixel_stride.max(1) as usize;
        plane
            .data
            .get(index)
            .map(|&v| v as f32)
            .ok_or_else(|| out_of_bounds(what))
    };

    let (width, height) = (frame.width as usize, frame.height as usize);
    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let luma = sample(y_plane, x, y, "Y")?;
            let u = sample(u_plane, x / 2, y / 2, "U")? - 128.0;
            let v = sample(v_plane, x / 2, y / 2, "V")? - 128.0;

            let r = luma + 1.402 * v;
            let g = luma - 0.344_136 * u - 0.714_136 * v;
            let b = luma + 1.772 * u;
            out.extend_from_slice(&[
                r.clamp(0.0, 255.0) as u8,
                g.clamp(0.0, 255.0) as u8,
                b.clamp(0.0, 255.0) as u8,
            ]);
        }
    }
    Ok(out)
}
