//! Format negotiation
//!
//! Reduces a device's enumerated formats to the allow-listed sizes and resolves a
//! requested (size, frame rate) to a pair the hardware actually supports.

use serde::{Deserialize, Serialize};

use crate::errors::{CaptureError, Result};
use crate::types::{PixelFormat, Size};

/// Sizes offered to callers, in preference order
pub const COMMON_SIZES: [Size; 4] = [
    Size::new(1280, 720),
    Size::new(1920, 1080),
    Size::new(2560, 1440),
    Size::new(3840, 2160),
];

/// Frame rates above this are never offered
pub const MAX_FRAME_RATE: u32 = 60;

/// One format as enumerated by the camera driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFormat {
    pub size: Size,
    pub pixel_format: PixelFormat,
    pub frame_rates: Vec<u32>,
}

impl RawFormat {
    pub fn new(size: Size, pixel_format: PixelFormat, frame_rates: Vec<u32>) -> Self {
        Self {
            size,
            pixel_format,
            frame_rates,
        }
    }
}

/// An allow-listed size with its distinct, ascending frame rates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedSize {
    pub width: u32,
    pub height: u32,
    pub frame_rates: Vec<u32>,
}

impl SupportedSize {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn max_frame_rate(&self) -> Option<u32> {
        self.frame_rates.last().copied()
    }
}

/// Capabilities of one device, fixed for the lifetime of an `open`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    sizes: Vec<SupportedSize>,
}

impl CapabilitySet {
    /// Intersect enumerated formats with [`COMMON_SIZES`].
    ///
    /// Rates from every hardware format sharing a size are merged. Sizes left with
    /// no rate at or below [`MAX_FRAME_RATE`] are dropped.
    pub fn from_formats(formats: &[RawFormat]) -> Self {
        let sizes = COMMON_SIZES
            .iter()
            .filter_map(|common| {
                let mut rates: Vec<u32> = formats
                    .iter()
                    .filter(|f| f.size == *common)
                    .flat_map(|f| f.frame_rates.iter().copied())
                    .filter(|&fps| fps > 0 && fps <= MAX_FRAME_RATE)
                    .collect();
                rates.sort_unstable();
                rates.dedup();

                if rates.is_empty() {
                    None
                } else {
                    Some(SupportedSize {
                        width: common.width,
                        height: common.height,
                        frame_rates: rates,
                    })
                }
            })
            .collect();

        Self { sizes }
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn sizes(&self) -> &[SupportedSize] {
        &self.sizes
    }

    pub fn find(&self, size: Size) -> Option<&SupportedSize> {
        self.sizes.iter().find(|s| s.size() == size)
    }

    pub fn frame_rates_for(&self, size: Size) -> &[u32] {
        self.find(size).map(|s| s.frame_rates.as_slice()).unwrap_or(&[])
    }
}

/// Outcome of a negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub size: Size,
    pub frame_rate: u32,
    pub capabilities: CapabilitySet,
}

impl NegotiatedFormat {
    /// Frame rates offered for the negotiated size
    pub fn supported_fps(&self) -> Vec<u32> {
        self.capabilities.frame_rates_for(self.size).to_vec()
    }
}

/// Resolve a request against enumerated formats.
///
/// An unsupported size falls back to the first allow-listed size the device has; an
/// unsupported rate falls back to the highest rate available for the chosen size.
pub fn negotiate(formats: &[RawFormat], requested_size: Size, requested_rate: u32) -> Result<NegotiatedFormat> {
    let capabilities = CapabilitySet::from_formats(formats);

    let chosen = match capabilities.find(requested_size) {
        Some(found) => found,
        None => capabilities.sizes().first().ok_or_else(|| {
            CaptureError::UnsupportedDevice(format!(
                "no allow-listed size among {} enumerated formats",
                formats.len()
            ))
        })?,
    };

    let frame_rate = if chosen.frame_rates.contains(&requested_rate) {
        requested_rate
    } else {
        // Non-empty by construction of the capability set.
        chosen.max_frame_rate().unwrap_or(requested_rate)
    };

    if chosen.size() != requested_size || frame_rate != requested_rate {
        log::info!(
            "Requested {}@{} unavailable, negotiated {}@{}",
            requested_size,
            requested_rate,
            chosen.size(),
            frame_rate
        );
    }

    let size = chosen.size();
    Ok(NegotiatedFormat {
        size,
        frame_rate,
        capabilities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(w: u32, h: u32, rates: &[u32]) -> RawFormat {
        RawFormat::new(Size::new(w, h), PixelFormat::Yuv420, rates.to_vec())
    }

    #[test]
    fn test_filters_to_allow_list_and_merges_rates() {
        let formats = vec![
            fmt(640, 480, &[30]),
            fmt(1920, 1080, &[60, 30]),
            fmt(1920, 1080, &[30, 24, 120]),
            fmt(1280, 720, &[15]),
        ];
        let caps = CapabilitySet::from_formats(&formats);

        assert_eq!(caps.sizes().len(), 2);
        assert_eq!(caps.sizes()[0].size(), Size::new(1280, 720));
        assert_eq!(caps.frame_rates_for(Size::new(1920, 1080)), &[24, 30, 60]);
        assert!(caps.find(Size::new(640, 480)).is_none());
    }

    #[test]
    fn test_rate_fallback_to_max() {
        let formats = vec![fmt(1920, 1080, &[24, 30, 60])];
        let negotiated = negotiate(&formats, Size::new(1920, 1080), 45).unwrap();
        assert_eq!(negotiated.frame_rate, 60);
        assert_eq!(negotiated.size, Size::new(1920, 1080));
    }

    #[test]
    fn test_size_fallback_to_first_supported() {
        let formats = vec![fmt(3840, 2160, &[30]), fmt(1920, 1080, &[30])];
        let negotiated = negotiate(&formats, Size::new(1280, 720), 30).unwrap();
        assert_eq!(negotiated.size, Size::new(1920, 1080));
        assert_eq!(negotiated.frame_rate, 30);
    }

    #[test]
    fn test_size_with_only_high_rates_is_excluded() {
        let formats = vec![fmt(1280, 720, &[120, 240]), fmt(2560, 1440, &[30])];
        let negotiated = negotiate(&formats, Size::new(1280, 720), 120).unwrap();
        assert_eq!(negotiated.size, Size::new(2560, 1440));
        assert_eq!(negotiated.supported_fps(), vec![30]);
    }

    #[test]
    fn test_no_allow_listed_size_is_unsupported() {
        let formats = vec![fmt(640, 480, &[30]), fmt(320, 240, &[15])];
        let err = negotiate(&formats, Size::new(640, 480), 30).unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedDevice(_)));

        assert!(matches!(
            negotiate(&[], Size::new(1280, 720), 30),
            Err(CaptureError::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let formats = vec![fmt(1920, 1080, &[30, 15]), fmt(1280, 720, &[60, 30])];
        let a = negotiate(&formats, Size::new(1920, 1080), 25).unwrap();
        let b = negotiate(&formats, Size::new(1920, 1080), 25).unwrap();
        assert_eq!(a, b);
    }
}
