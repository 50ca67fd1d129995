//! Camera driver backed by nokhwa
//!
//! nokhwa cameras are created and polled on one capture thread per open device;
//! frames are decoded to RGB8 there and fanned out to the running request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::{query, Camera};

use super::{CameraDescriptor, CameraDevice, CameraDriver, CaptureSession, DeviceCallback, DeviceEvent, SessionCallback};
use crate::errors::{CaptureError, Result};
use crate::lock_unpoisoned;
use crate::negotiation::{NegotiatedFormat, RawFormat};
use crate::pipeline::request::RepeatingRequest;
use crate::pipeline::targets::{OutputTarget, TargetKind};
use crate::types::{CapturedFrame, LensFacing, PixelFormat, Plane, Size};

/// Error code reported when the capture stream cannot be opened
pub const ERROR_STREAM_OPEN: i32 = 1;
/// Consecutive failed reads before the device is reported disconnected
const MAX_READ_FAILURES: u32 = 30;

type SharedCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;
type RequestSlot = Arc<Mutex<Option<(u64, RepeatingRequest)>>>;

#[derive(Debug, Default)]
pub struct NokhwaDriver;

impl NokhwaDriver {
    pub fn new() -> Self {
        Self
    }
}

fn parse_index(device_id: &str) -> Result<u32> {
    device_id
        .parse::<u32>()
        .map_err(|_| CaptureError::DeviceError(format!("Invalid device ID {}", device_id)))
}

/// Formats the device reports, or the usual webcam modes when it cannot be queried
fn query_formats(index: u32) -> Vec<RawFormat> {
    let queried = Camera::new(
        CameraIndex::Index(index),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    )
    .and_then(|mut camera| camera.compatible_camera_formats());

    match queried {
        Ok(formats) if !formats.is_empty() => {
            let mut raw: Vec<RawFormat> = Vec::new();
            for format in formats {
                let size = Size::new(format.resolution().width_x, format.resolution().height_y);
                match raw.iter_mut().find(|r| r.size == size) {
                    Some(existing) => {
                        if !existing.frame_rates.contains(&format.frame_rate()) {
                            existing.frame_rates.push(format.frame_rate());
                        }
                    }
                    None => raw.push(RawFormat::new(size, PixelFormat::Rgb8, vec![format.frame_rate()])),
                }
            }
            raw
        }
        _ => {
            log::debug!("Camera {} could not be queried, assuming common modes", index);
            vec![
                RawFormat::new(Size::new(640, 480), PixelFormat::Rgb8, vec![15, 30]),
                RawFormat::new(Size::new(1280, 720), PixelFormat::Rgb8, vec![15, 30]),
                RawFormat::new(Size::new(1920, 1080), PixelFormat::Rgb8, vec![15, 30]),
            ]
        }
    }
}

impl CameraDriver for NokhwaDriver {
    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        let cameras = query(ApiBackend::Auto)
            .map_err(|e| CaptureError::DeviceError(format!("Failed to query cameras: {}", e)))?;

        let mut descriptors = Vec::with_capacity(cameras.len());
        for info in cameras {
            let Ok(index) = info.index().as_index() else {
                continue;
            };
            descriptors.push(CameraDescriptor {
                id: index.to_string(),
                name: info.human_name(),
                facing: LensFacing::External,
                sensor_orientation: 0,
                formats: query_formats(index),
            });
        }
        Ok(descriptors)
    }

    fn open(&self, device_id: &str, callback: DeviceCallback) -> Result<()> {
        let index = parse_index(device_id)?;
        let callback: SharedCallback = Arc::from(callback);
        callback(DeviceEvent::Opened(Box::new(NokhwaDevice {
            id: device_id.to_string(),
            index,
            callback,
            request: Arc::new(Mutex::new(None)),
            next_session: 0,
            capture: None,
        })));
        Ok(())
    }
}

struct CaptureThread {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct NokhwaDevice {
    id: String,
    index: u32,
    callback: SharedCallback,
    request: RequestSlot,
    next_session: u64,
    capture: Option<CaptureThread>,
}

impl NokhwaDevice {
    fn stop_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.running.store(false, Ordering::SeqCst);
            if capture.thread.join().is_err() {
                log::error!("Camera {} capture thread panicked", self.id);
            }
        }
    }
}

impl CameraDevice for NokhwaDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure_format(&mut self, format: &NegotiatedFormat) -> Result<()> {
        self.stop_capture();

        let requested = CameraFormat::new(
            Resolution::new(format.size.width, format.size.height),
            FrameFormat::MJPEG,
            format.frame_rate,
        );
        let running = Arc::new(AtomicBool::new(true));
        let worker = CaptureWorker {
            index: self.index,
            requested,
            running: running.clone(),
            request: self.request.clone(),
            callback: self.callback.clone(),
            sequence: AtomicU64::new(0),
        };
        let thread = std::thread::Builder::new()
            .name("crabcapture-native-camera".to_string())
            .spawn(move || worker.run())
            .map_err(|e| CaptureError::DeviceError(format!("Failed to spawn capture thread: {}", e)))?;

        self.capture = Some(CaptureThread { running, thread });
        Ok(())
    }

    fn create_session(&mut self, targets: Vec<OutputTarget>, callback: SessionCallback) -> Result<()> {
        self.next_session += 1;
        log::debug!("Camera {} session {} with {} target(s)", self.id, self.next_session, targets.len());
        callback(Ok(Box::new(NokhwaSession {
            id: self.next_session,
            request: self.request.clone(),
        })));
        Ok(())
    }

    fn close(mut self: Box<Self>) {
        lock_unpoisoned(&self.request).take();
        self.stop_capture();
        log::info!("Camera {} closed", self.id);
    }
}

struct NokhwaSession {
    id: u64,
    request: RequestSlot,
}

impl NokhwaSession {
    fn clear_if_current(&self) {
        let mut slot = lock_unpoisoned(&self.request);
        if matches!(slot.as_ref(), Some((id, _)) if *id == self.id) {
            slot.take();
        }
    }
}

impl CaptureSession for NokhwaSession {
    fn set_repeating_request(&mut self, request: RepeatingRequest) -> Result<()> {
        *lock_unpoisoned(&self.request) = Some((self.id, request));
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<()> {
        self.clear_if_current();
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_output_rotation(&mut self, kind: TargetKind, degrees: u32) -> Result<()> {
        // Webcams have no rotatable output; consumers apply the rotation tag.
        log::debug!("Rotation {} for {} left to the consumer", degrees, kind);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.clear_if_current();
        Ok(())
    }
}

struct CaptureWorker {
    index: u32,
    requested: CameraFormat,
    running: Arc<AtomicBool>,
    request: RequestSlot,
    callback: SharedCallback,
    sequence: AtomicU64,
}

impl CaptureWorker {
    fn run(self) {
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(self.requested));
        let mut camera = match Camera::new(CameraIndex::Index(self.index), format) {
            Ok(camera) => camera,
            Err(e) => {
                log::error!("Failed to initialize camera {}: {}", self.index, e);
                (self.callback)(DeviceEvent::Error(ERROR_STREAM_OPEN));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            log::error!("Failed to start stream on camera {}: {}", self.index, e);
            (self.callback)(DeviceEvent::Error(ERROR_STREAM_OPEN));
            return;
        }

        let mut failures = 0;
        while self.running.load(Ordering::SeqCst) {
            let frame = camera.frame().and_then(|buffer| {
                let resolution = buffer.resolution();
                buffer
                    .decode_image::<RgbFormat>()
                    .map(|rgb| (resolution.width_x, resolution.height_y, rgb.into_raw()))
            });

            match frame {
                Ok((width, height, rgb)) => {
                    failures = 0;
                    self.deliver(width, height, rgb);
                }
                Err(e) => {
                    failures += 1;
                    log::warn!("Camera {} read failed: {}", self.index, e);
                    if failures >= MAX_READ_FAILURES {
                        (self.callback)(DeviceEvent::Disconnected);
                        break;
                    }
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop stream on camera {}: {}", self.index, e);
        }
    }

    fn deliver(&self, width: u32, height: u32, rgb: Vec<u8>) {
        let request = lock_unpoisoned(&self.request).as_ref().map(|(_, r)| r.clone());
        let Some(request) = request else {
            return;
        };

        let frame = CapturedFrame {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            timestamp_us: chrono::Utc::now().timestamp_micros() as u64,
            width,
            height,
            format: PixelFormat::Rgb8,
            planes: vec![Plane::new(Bytes::from(rgb), width * 3, 3)],
        };
        request.deliver(&frame);
    }
}
