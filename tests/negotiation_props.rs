//! Property-based tests for format negotiation
//!
//! Run with: cargo test --test negotiation_props

use crabcapture::negotiation::{negotiate, CapabilitySet, RawFormat, COMMON_SIZES, MAX_FRAME_RATE};
use crabcapture::{CaptureError, PixelFormat, Size};
use proptest::prelude::*;

fn any_size() -> impl Strategy<Value = Size> {
    prop_oneof![
        prop::sample::select(COMMON_SIZES.to_vec()),
        (1u32..4096, 1u32..2160).prop_map(|(w, h)| Size::new(w, h)),
    ]
}

fn any_format() -> impl Strategy<Value = RawFormat> {
    (any_size(), prop::collection::vec(0u32..240, 0..6))
        .prop_map(|(size, rates)| RawFormat::new(size, PixelFormat::Yuv420, rates))
}

proptest! {
    /// Only allow-listed sizes with rates in (0, MAX_FRAME_RATE] survive
    #[test]
    fn capabilities_are_allow_listed_and_capped(formats in prop::collection::vec(any_format(), 0..12)) {
        let caps = CapabilitySet::from_formats(&formats);
        for supported in caps.sizes() {
            prop_assert!(COMMON_SIZES.contains(&supported.size()));
            prop_assert!(!supported.frame_rates.is_empty());
            prop_assert!(supported.frame_rates.iter().all(|&fps| fps > 0 && fps <= MAX_FRAME_RATE));
            prop_assert!(supported.frame_rates.windows(2).all(|w| w[0] < w[1]));
        }
    }

    /// Whatever is requested, the result is something the device offers
    #[test]
    fn negotiated_pair_is_supported(
        formats in prop::collection::vec(any_format(), 0..12),
        requested in any_size(),
        rate in 0u32..240,
    ) {
        let caps = CapabilitySet::from_formats(&formats);
        match negotiate(&formats, requested, rate) {
            Ok(negotiated) => {
                prop_assert!(caps.frame_rates_for(negotiated.size).contains(&negotiated.frame_rate));
                if caps.find(requested).is_some() {
                    prop_assert_eq!(negotiated.size, requested);
                } else {
                    prop_assert_eq!(negotiated.size, caps.sizes()[0].size());
                }
                prop_assert_eq!(negotiated.supported_fps(), caps.frame_rates_for(negotiated.size).to_vec());
            }
            Err(e) => {
                prop_assert!(caps.is_empty());
                prop_assert!(matches!(e, CaptureError::UnsupportedDevice(_)));
            }
        }
    }

    /// A supported rate is kept, an unsupported one becomes the highest available
    #[test]
    fn rate_fallback_picks_maximum(rates in prop::collection::vec(1u32..=MAX_FRAME_RATE, 1..6), rate in 0u32..240) {
        let size = Size::new(1920, 1080);
        let formats = vec![RawFormat::new(size, PixelFormat::Yuv420, rates.clone())];
        let negotiated = negotiate(&formats, size, rate).unwrap();

        if rates.contains(&rate) {
            prop_assert_eq!(negotiated.frame_rate, rate);
        } else {
            prop_assert_eq!(Some(negotiated.frame_rate), rates.iter().copied().max());
        }
    }
}

#[test]
fn test_no_allow_listed_size_is_unsupported() {
    let formats = vec![RawFormat::new(Size::new(640, 480), PixelFormat::Yuv420, vec![30])];
    let err = negotiate(&formats, Size::new(640, 480), 30).unwrap_err();
    assert!(matches!(err, CaptureError::UnsupportedDevice(_)));
}

#[test]
fn test_size_fallback_follows_preference_order() {
    let formats = vec![
        RawFormat::new(Size::new(3840, 2160), PixelFormat::Yuv420, vec![30]),
        RawFormat::new(Size::new(1920, 1080), PixelFormat::Yuv420, vec![30]),
    ];
    let negotiated = negotiate(&formats, Size::new(800, 600), 30).unwrap();
    assert_eq!(negotiated.size, Size::new(1920, 1080));
}
