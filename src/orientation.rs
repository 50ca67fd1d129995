//! Orientation resolution
//!
//! Maps the device's clockwise rotation, the sensor mounting angle and the lens
//! facing to the corrective rotation applied to image-stream frames and the
//! display rotation applied to live output connections.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::errors::{CaptureError, Result};
use crate::types::LensFacing;

/// Device rotation, clockwise from natural portrait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceRotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl DeviceRotation {
    /// Accepts any right angle, including negative or multi-turn values.
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(DeviceRotation::Deg0),
            90 => Ok(DeviceRotation::Deg90),
            180 => Ok(DeviceRotation::Deg180),
            270 => Ok(DeviceRotation::Deg270),
            other => Err(CaptureError::InvalidArgument(format!(
                "device rotation must be a multiple of 90 degrees, got {}",
                other
            ))),
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            DeviceRotation::Deg0 => 0,
            DeviceRotation::Deg90 => 90,
            DeviceRotation::Deg180 => 180,
            DeviceRotation::Deg270 => 270,
        }
    }

    /// Counter-clockwise display rotation for this clockwise device rotation
    pub fn display_degrees(&self) -> u32 {
        match self {
            DeviceRotation::Deg0 => 0,
            DeviceRotation::Deg90 => 270,
            DeviceRotation::Deg180 => 180,
            DeviceRotation::Deg270 => 90,
        }
    }
}

/// Every rotation value derived for one orientation change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientationData {
    pub sensor_orientation_degrees: u32,
    pub device_orientation_degrees: u32,
    pub display_orientation_degrees: u32,
    pub rotation_degrees: u32,
}

/// Resolve the corrective rotation for a camera.
///
/// `rotation = (sensor - display * sign + 360) mod 360`, where `sign` is `+1` for
/// front-facing lenses and `-1` otherwise. External lenses are treated as back-facing.
pub fn resolve(device: DeviceRotation, sensor_orientation: i32, facing: LensFacing) -> OrientationData {
    let sensor = sensor_orientation.rem_euclid(360);
    let display = device.display_degrees() as i32;
    let sign = match facing {
        LensFacing::Front => 1,
        LensFacing::Back | LensFacing::External => -1,
    };
    let rotation = (sensor - display * sign + 360).rem_euclid(360);

    OrientationData {
        sensor_orientation_degrees: sensor as u32,
        device_orientation_degrees: device.degrees(),
        display_orientation_degrees: display as u32,
        rotation_degrees: rotation as u32,
    }
}

/// Corrective rotation shared between the control thread (writer) and the
/// image-stream delivery thread (reader).
#[derive(Debug, Clone, Default)]
pub struct RotationCell {
    degrees: Arc<AtomicU32>,
}

impl RotationCell {
    pub fn new(degrees: u32) -> Self {
        Self {
            degrees: Arc::new(AtomicU32::new(degrees % 360)),
        }
    }

    pub fn get(&self) -> u32 {
        self.degrees.load(Ordering::Acquire)
    }

    pub fn set(&self, degrees: u32) {
        self.degrees.store(degrees % 360, Ordering::Release);
    }
}
