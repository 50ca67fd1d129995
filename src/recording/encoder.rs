//! H.264 encoding of captured frames via openh264

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use crate::errors::{CaptureError, Result};
use crate::image_stream::to_rgb8;
use crate::types::{CapturedFrame, PixelFormat, Plane, Size};

pub struct H264Encoder {
    encoder: Encoder,
    size: Size,
    frames_encoded: u64,
}

/// One encoded access unit in Annex B form
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

impl H264Encoder {
    /// Dimensions must be even; openh264 infers them from each buffer.
    pub fn new(size: Size) -> Result<Self> {
        if size.width == 0 || size.height == 0 || size.width % 2 != 0 || size.height % 2 != 0 {
            return Err(CaptureError::RecordingError(format!(
                "H.264 needs even, non-zero dimensions, got {}",
                size
            )));
        }
        let encoder = Encoder::new()
            .map_err(|e| CaptureError::RecordingError(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            size,
            frames_encoded: 0,
        })
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn encode(&mut self, frame: &CapturedFrame) -> Result<EncodedFrame> {
        if frame.size() != self.size {
            return Err(CaptureError::RecordingError(format!(
                "frame is {}, recorder expects {}",
                frame.size(),
                self.size
            )));
        }

        let i420 = match frame.format {
            PixelFormat::Yuv420 => pack_i420(frame)?,
            _ => {
                let rgb = to_rgb8(frame)?;
                rgb_to_i420(&rgb, self.size.width as usize, self.size.height as usize)
            }
        };

        let buffer = YUVBuffer::from_vec(i420, self.size.width as usize, self.size.height as usize);
        let bitstream = self
            .encoder
            .encode(&buffer)
            .map_err(|e| CaptureError::RecordingError(format!("Encoding failed: {}", e)))?;

        self.frames_encoded += 1;
        Ok(EncodedFrame {
            is_keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: bitstream.to_vec(),
        })
    }
}

/// Tightly packed I420 from a strided 4:2:0 frame
fn pack_i420(frame: &CapturedFrame) -> Result<Vec<u8>> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let (cw, ch) = (w / 2, h / 2);
    let mut out = Vec::with_capacity(w * h + cw * ch * 2);

    let copy = |plane: &Plane, pw: usize, ph: usize, out: &mut Vec<u8>| -> Result<()> {
        let step = plane.pixel_stride.max(1) as usize;
        for y in 0..ph {
            for x in 0..pw {
                let i = y * plane.row_stride as usize + x * step;
                let v = plane
                    .data
                    .get(i)
                    .ok_or_else(|| CaptureError::ConversionError("YUV plane too short".to_string()))?;
                out.push(*v);
            }
        }
        Ok(())
    };

    match frame.planes.as_slice() {
        [y, u, v] => {
            copy(y, w, h, &mut out)?;
            copy(u, cw, ch, &mut out)?;
            copy(v, cw, ch, &mut out)?;
            Ok(out)
        }
        _ => Err(CaptureError::ConversionError("YUV frame needs three planes".to_string())),
    }
}

/// BT.601 studio-swing RGB24 to I420, chroma taken from the top-left pixel of each 2x2 block
fn rgb_to_i420(rgb: &[u8], w: usize, h: usize) -> Vec<u8> {
    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];
    let (y_plane, chroma) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = chroma.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 3;
            let (r, g, b) = (rgb[i] as i32, rgb[i + 1] as i32, rgb[i + 2] as i32);
            y_plane[y * w + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let c = (y / 2) * (w / 2) + x / 2;
                u_plane[c] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
                v_plane[c] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            }
        }
    }
    yuv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{synthetic_rgb_frame, synthetic_yuv_frame};

    #[test]
    fn test_i420_sizes() {
        let rgb = vec![128u8; 64 * 48 * 3];
        assert_eq!(rgb_to_i420(&rgb, 64, 48).len(), 64 * 48 * 3 / 2);

        let packed = pack_i420(&synthetic_yuv_frame(0, 64, 48)).unwrap();
        assert_eq!(packed.len(), 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_odd_size_rejected() {
        assert!(H264Encoder::new(Size::new(63, 48)).is_err());
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let mut encoder = H264Encoder::new(Size::new(64, 48)).unwrap();
        let encoded = encoder.encode(&synthetic_rgb_frame(0, 64, 48)).unwrap();
        assert!(encoded.is_keyframe);
        assert!(encoded.data.starts_with(&[0, 0, 0, 1]) || encoded.data.starts_with(&[0, 0, 1]));
        assert_eq!(encoder.frames_encoded(), 1);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut encoder = H264Encoder::new(Size::new(64, 48)).unwrap();
        assert!(encoder.encode(&synthetic_rgb_frame(0, 32, 48)).is_err());
    }
}
