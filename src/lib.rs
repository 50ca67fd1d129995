//! CrabCapture: one camera, many consumers
//!
//! A capture session coordinator. A single opened camera is multiplexed across a
//! preview texture, a throttled image stream, a raw PCM audio stream and a video
//! recorder. Attaching or detaching a consumer rebuilds the capture session on a
//! serialized control thread, so consumers never observe a half-configured device.
//!
//! # Features
//! - `native`: camera driver backed by nokhwa
//! - `audio`: microphone source backed by cpal
//! - `recording`: H.264/MP4 recorder backed by openh264 and muxide
//!
//! Without features the crate runs against the simulated driver in [`platform::simulated`].
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use crabcapture::platform::simulated::SimulatedDriver;
//! use crabcapture::{CameraRequest, PipelineController, Size};
//!
//! # async fn run() -> crabcapture::Result<()> {
//! let controller = PipelineController::builder(Arc::new(SimulatedDriver::with_default_cameras())).build();
//! let camera = controller.open(CameraRequest::new(0, Size::new(1280, 720), 30)).await?;
//! println!("preview texture {}", camera.texture_id);
//! controller.close().await?;
//! # Ok(())
//! # }
//! ```
pub mod audio;
pub mod config;
pub mod errors;
pub mod image_stream;
pub mod negotiation;
pub mod orientation;
pub mod permissions;
pub mod pipeline;
pub mod platform;
pub mod preview;
pub mod recording;
pub mod types;

// Testing utilities - synthetic frames and sinks for offline testing
pub mod testing;

use std::sync::{Mutex, MutexGuard};

// Re-exports for convenience
pub use config::CrabCaptureConfig;
pub use errors::{CaptureError, Result};
pub use orientation::{DeviceRotation, OrientationData};
pub use permissions::{Capability, PermissionStatus};
pub use pipeline::{OutputTarget, PipelineController, PipelineState, PipelineStatus, TargetKind};
pub use types::{
    AudioStreamRequest, CameraData, CameraRequest, CapturedFrame, ImageStreamRequest, LensFacing, PixelFormat,
    Size, TransportFormat,
};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Initialize logging for the capture pipeline
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcapture=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        features: enabled_features(),
    }
}

fn enabled_features() -> Vec<String> {
    let mut features = Vec::new();
    if cfg!(feature = "native") {
        features.push("native".to_string());
    }
    if cfg!(feature = "audio") {
        features.push("audio".to_string());
    }
    if cfg!(feature = "recording") {
        features.push("recording".to_string());
    }
    features
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub features: Vec<String>,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabcapture");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_lock_unpoisoned_recovers() {
        let mutex = std::sync::Arc::new(Mutex::new(5));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(mutex.is_poisoned());
        *lock_unpoisoned(&mutex) += 1;
        assert_eq!(*lock_unpoisoned(&mutex), 6);
    }
}
