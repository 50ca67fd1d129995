//! Property-based tests for orientation resolution
//!
//! Run with: cargo test --test orientation_props

use crabcapture::orientation::resolve;
use crabcapture::{DeviceRotation, LensFacing};
use proptest::prelude::*;

fn any_rotation() -> impl Strategy<Value = DeviceRotation> {
    prop::sample::select(vec![
        DeviceRotation::Deg0,
        DeviceRotation::Deg90,
        DeviceRotation::Deg180,
        DeviceRotation::Deg270,
    ])
}

fn any_facing() -> impl Strategy<Value = LensFacing> {
    prop::sample::select(vec![LensFacing::Back, LensFacing::Front, LensFacing::External])
}

proptest! {
    #[test]
    fn rotation_is_normalized(rotation in any_rotation(), sensor in -1080i32..1080, facing in any_facing()) {
        let data = resolve(rotation, sensor, facing);
        prop_assert!(data.rotation_degrees < 360);
        prop_assert!(data.sensor_orientation_degrees < 360);
        prop_assert_eq!(data.sensor_orientation_degrees as i32, sensor.rem_euclid(360));
        prop_assert_eq!(data.device_orientation_degrees, rotation.degrees());
        prop_assert_eq!(data.display_orientation_degrees, rotation.display_degrees());
    }

    /// Right-angle sensors always yield right-angle corrections
    #[test]
    fn right_angles_stay_right_angles(rotation in any_rotation(), quarter in 0i32..4, facing in any_facing()) {
        let data = resolve(rotation, quarter * 90, facing);
        prop_assert_eq!(data.rotation_degrees % 90, 0);
    }

    /// Upright device: the correction is the sensor mounting angle regardless of facing
    #[test]
    fn upright_device_uses_sensor_angle(sensor in 0i32..360, facing in any_facing()) {
        let data = resolve(DeviceRotation::Deg0, sensor, facing);
        prop_assert_eq!(data.rotation_degrees as i32, sensor);
    }

    /// Front lenses rotate against the display, back lenses with it
    #[test]
    fn front_and_back_differ_by_twice_the_display(rotation in any_rotation(), sensor in 0i32..360) {
        let back = resolve(rotation, sensor, LensFacing::Back).rotation_degrees;
        let front = resolve(rotation, sensor, LensFacing::Front).rotation_degrees;
        let display = rotation.display_degrees();
        prop_assert_eq!((back + 720 - front) % 360, (2 * display) % 360);
    }

    /// External lenses are treated as back-facing
    #[test]
    fn external_matches_back(rotation in any_rotation(), sensor in -720i32..720) {
        prop_assert_eq!(
            resolve(rotation, sensor, LensFacing::External),
            resolve(rotation, sensor, LensFacing::Back)
        );
    }

    #[test]
    fn from_degrees_accepts_right_angles(turns in -4i32..4, quarter in 0i32..4) {
        let degrees = turns * 360 + quarter * 90;
        let rotation = DeviceRotation::from_degrees(degrees).unwrap();
        prop_assert_eq!(rotation.degrees() as i32, quarter * 90);
    }

    #[test]
    fn from_degrees_rejects_other_angles(degrees in -1000i32..1000) {
        prop_assume!(degrees.rem_euclid(90) != 0);
        prop_assert!(DeviceRotation::from_degrees(degrees).is_err());
    }
}
