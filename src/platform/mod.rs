//! Camera driver contract
//!
//! The pipeline talks to hardware only through these traits. Each platform binding
//! is an adapter implementing them; callbacks may fire on any driver thread.

use crate::errors::Result;
use crate::negotiation::{NegotiatedFormat, RawFormat};
use crate::pipeline::request::RepeatingRequest;
use crate::pipeline::targets::{OutputTarget, TargetKind};
use crate::types::LensFacing;

#[cfg(feature = "native")]
pub mod native;
pub mod simulated;

/// Static description of an enumerated camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    pub id: String,
    pub name: String,
    pub facing: LensFacing,
    /// Clockwise mounting angle of the sensor in degrees
    pub sensor_orientation: i32,
    pub formats: Vec<RawFormat>,
}

/// Lifecycle notifications for an open request
pub enum DeviceEvent {
    Opened(Box<dyn CameraDevice>),
    Disconnected,
    Error(i32),
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::Disconnected => write!(f, "Disconnected"),
            DeviceEvent::Error(code) => write!(f, "Error({})", code),
        }
    }
}

pub type DeviceCallback = Box<dyn Fn(DeviceEvent) + Send + Sync + 'static>;

/// Completion of `create_session`: the configured session or the configure failure
pub type SessionCallback = Box<dyn FnOnce(Result<Box<dyn CaptureSession>>) + Send + 'static>;

pub trait CameraDriver: Send + Sync {
    fn enumerate(&self) -> Result<Vec<CameraDescriptor>>;

    /// Begin opening a device. The outcome arrives through `callback`; an `Err`
    /// here means the request could not even be issued.
    fn open(&self, device_id: &str, callback: DeviceCallback) -> Result<()>;
}

/// An opened hardware camera. At most one is held at a time.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    fn configure_format(&mut self, format: &NegotiatedFormat) -> Result<()>;

    /// Build a session bound to `targets`. Configuration completes through `callback`.
    fn create_session(&mut self, targets: Vec<OutputTarget>, callback: SessionCallback) -> Result<()>;

    fn close(self: Box<Self>);
}

/// A configured binding of the device to a fixed set of targets
pub trait CaptureSession: Send {
    fn set_repeating_request(&mut self, request: RepeatingRequest) -> Result<()>;

    fn stop_repeating(&mut self) -> Result<()>;

    fn abort_captures(&mut self) -> Result<()>;

    /// Rotate a live output connection without restarting capture
    fn set_output_rotation(&mut self, kind: TargetKind, degrees: u32) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}
