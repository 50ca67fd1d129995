//! Simulated camera, microphone and recorder
//!
//! Deterministic stand-ins for hardware. Frames are only produced when asked
//! (`emit_frame`) or by an optional pump thread, so tests control timing exactly.
//! Failure knobs let tests drive the error paths of open and session configuration.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CameraDescriptor, CameraDevice, CameraDriver, CaptureSession, DeviceCallback, DeviceEvent, SessionCallback};
use crate::audio::{AudioSource, PcmInput};
use crate::errors::{CaptureError, Result};
use crate::lock_unpoisoned;
use crate::negotiation::{NegotiatedFormat, RawFormat};
use crate::pipeline::request::RepeatingRequest;
use crate::pipeline::targets::{FrameSink, OutputTarget, TargetKind};
use crate::recording::{MediaRecorder, RecorderEvent, RecorderEvents, RecorderFactory, RecorderSettings};
use crate::testing::{synthetic_frame, synthetic_pcm_chunk};
use crate::types::{CapturedFrame, LensFacing, PixelFormat, Size};

type SharedCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

#[derive(Default)]
struct SimState {
    device_open: Option<String>,
    callback: Option<SharedCallback>,
    format: Option<NegotiatedFormat>,
    next_session: u64,
    sessions_alive: usize,
    max_sessions_alive: usize,
    sessions_created: u64,
    active_session: Option<u64>,
    request: Option<RepeatingRequest>,
    rotations: HashMap<TargetKind, u32>,
}

struct SimShared {
    cameras: Vec<CameraDescriptor>,
    state: Mutex<SimState>,
    open_error: Mutex<Option<i32>>,
    reject_open: AtomicBool,
    configure_failures: AtomicU32,
    hold_configures: AtomicBool,
    held_configures: Mutex<Vec<(u64, SessionCallback)>>,
    sequence: AtomicU64,
    frame_interval: Mutex<Option<Duration>>,
    pump: Mutex<Option<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

/// Software camera driver
#[derive(Clone)]
pub struct SimulatedDriver {
    shared: Arc<SimShared>,
}

impl SimulatedDriver {
    pub fn new(cameras: Vec<CameraDescriptor>) -> Self {
        Self {
            shared: Arc::new(SimShared {
                cameras,
                state: Mutex::new(SimState::default()),
                open_error: Mutex::new(None),
                reject_open: AtomicBool::new(false),
                configure_failures: AtomicU32::new(0),
                hold_configures: AtomicBool::new(false),
                held_configures: Mutex::new(Vec::new()),
                sequence: AtomicU64::new(0),
                frame_interval: Mutex::new(None),
                pump: Mutex::new(None),
            }),
        }
    }

    /// One back camera (sensor at 90) and one front camera (sensor at 270),
    /// both offering 640x480, 1280x720 and 1920x1080.
    pub fn with_default_cameras() -> Self {
        let formats = || {
            vec![
                RawFormat::new(Size::new(640, 480), PixelFormat::Yuv420, vec![15, 30]),
                RawFormat::new(Size::new(1280, 720), PixelFormat::Yuv420, vec![15, 30, 60]),
                RawFormat::new(Size::new(1920, 1080), PixelFormat::Yuv420, vec![15, 30]),
            ]
        };
        Self::new(vec![
            CameraDescriptor {
                id: "sim-back".to_string(),
                name: "Simulated Back Camera".to_string(),
                facing: LensFacing::Back,
                sensor_orientation: 90,
                formats: formats(),
            },
            CameraDescriptor {
                id: "sim-front".to_string(),
                name: "Simulated Front Camera".to_string(),
                facing: LensFacing::Front,
                sensor_orientation: 270,
                formats: formats(),
            },
        ])
    }

    /// Produce frames continuously while a device is open
    pub fn with_frame_interval(self, interval: Duration) -> Self {
        *lock_unpoisoned(&self.shared.frame_interval) = Some(interval);
        self
    }

    /// Next open reports `DeviceEvent::Error(code)` instead of opening
    pub fn fail_next_open(&self, code: i32) {
        *lock_unpoisoned(&self.shared.open_error) = Some(code);
    }

    /// Open requests are refused outright
    pub fn set_reject_open(&self, reject: bool) {
        self.shared.reject_open.store(reject, Ordering::SeqCst);
    }

    /// The next `count` session configurations fail
    pub fn fail_next_configures(&self, count: u32) {
        self.shared.configure_failures.store(count, Ordering::SeqCst);
    }

    /// While set, session configurations stay pending until [`Self::complete_held_configures`]
    pub fn set_hold_configures(&self, hold: bool) {
        self.shared.hold_configures.store(hold, Ordering::SeqCst);
    }

    pub fn held_configures(&self) -> usize {
        lock_unpoisoned(&self.shared.held_configures).len()
    }

    /// Deliver every held configuration, in the order they were requested
    pub fn complete_held_configures(&self) {
        let held = std::mem::take(&mut *lock_unpoisoned(&self.shared.held_configures));
        for (session_id, callback) in held {
            callback(Ok(Box::new(SimulatedSession {
                id: session_id,
                shared: self.shared.clone(),
            })));
        }
    }

    pub fn is_device_open(&self) -> bool {
        lock_unpoisoned(&self.shared.state).device_open.is_some()
    }

    pub fn negotiated_format(&self) -> Option<NegotiatedFormat> {
        lock_unpoisoned(&self.shared.state).format.clone()
    }

    pub fn sessions_alive(&self) -> usize {
        lock_unpoisoned(&self.shared.state).sessions_alive
    }

    pub fn max_sessions_alive(&self) -> usize {
        lock_unpoisoned(&self.shared.state).max_sessions_alive
    }

    pub fn sessions_created(&self) -> u64 {
        lock_unpoisoned(&self.shared.state).sessions_created
    }

    /// Target kinds of the repeating request currently running
    pub fn active_targets(&self) -> Vec<TargetKind> {
        lock_unpoisoned(&self.shared.state)
            .request
            .as_ref()
            .map(|r| r.target_kinds())
            .unwrap_or_default()
    }

    pub fn active_request(&self) -> Option<RepeatingRequest> {
        lock_unpoisoned(&self.shared.state).request.clone()
    }

    pub fn output_rotation(&self, kind: TargetKind) -> Option<u32> {
        lock_unpoisoned(&self.shared.state).rotations.get(&kind).copied()
    }

    /// Deliver one frame to every target of the running request.
    /// Returns how many targets accepted it.
    pub fn emit_frame(&self) -> usize {
        self.shared.emit_frame()
    }

    pub fn emit_frames(&self, count: usize) -> usize {
        (0..count).map(|_| self.emit_frame()).sum()
    }

    pub fn simulate_disconnect(&self) {
        let callback = lock_unpoisoned(&self.shared.state).callback.clone();
        if let Some(callback) = callback {
            callback(DeviceEvent::Disconnected);
        }
    }

    pub fn simulate_error(&self, code: i32) {
        let callback = lock_unpoisoned(&self.shared.state).callback.clone();
        if let Some(callback) = callback {
            callback(DeviceEvent::Error(code));
        }
    }
}

impl SimShared {
    fn emit_frame(&self) -> usize {
        let Some(request) = lock_unpoisoned(&self.state).request.clone() else {
            return 0;
        };
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        request
            .targets
            .iter()
            .filter(|target| target.deliver(synthetic_frame(sequence, target.size(), target.format())))
            .count()
    }

    fn start_pump(self: &Arc<Self>) {
        let Some(interval) = *lock_unpoisoned(&self.frame_interval) else {
            return;
        };
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let shared = Arc::downgrade(self);
        let spawned = std::thread::Builder::new()
            .name("crabcapture-sim-camera".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    match shared.upgrade() {
                        Some(shared) => {
                            shared.emit_frame();
                        }
                        None => break,
                    }
                    std::thread::sleep(interval);
                }
            });
        match spawned {
            Ok(thread) => *lock_unpoisoned(&self.pump) = Some((running, thread)),
            Err(e) => log::warn!("Simulated camera pump failed to start: {}", e),
        }
    }

    fn stop_pump(&self) {
        if let Some((running, thread)) = lock_unpoisoned(&self.pump).take() {
            running.store(false, Ordering::SeqCst);
            let _ = thread.join();
        }
    }
}

impl CameraDriver for SimulatedDriver {
    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        Ok(self.shared.cameras.clone())
    }

    fn open(&self, device_id: &str, callback: DeviceCallback) -> Result<()> {
        if self.shared.reject_open.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceError(format!("camera {} is busy", device_id)));
        }
        if !self.shared.cameras.iter().any(|c| c.id == device_id) {
            return Err(CaptureError::DeviceError(format!("unknown camera {}", device_id)));
        }

        let callback: SharedCallback = Arc::from(callback);
        if let Some(code) = lock_unpoisoned(&self.shared.open_error).take() {
            callback(DeviceEvent::Error(code));
            return Ok(());
        }

        {
            let mut state = lock_unpoisoned(&self.shared.state);
            state.device_open = Some(device_id.to_string());
            state.callback = Some(callback.clone());
        }
        self.shared.start_pump();
        callback(DeviceEvent::Opened(Box::new(SimulatedDevice {
            id: device_id.to_string(),
            shared: self.shared.clone(),
        })));
        Ok(())
    }
}

struct SimulatedDevice {
    id: String,
    shared: Arc<SimShared>,
}

impl CameraDevice for SimulatedDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure_format(&mut self, format: &NegotiatedFormat) -> Result<()> {
        lock_unpoisoned(&self.shared.state).format = Some(format.clone());
        Ok(())
    }

    fn create_session(&mut self, targets: Vec<OutputTarget>, callback: SessionCallback) -> Result<()> {
        let failures = self.shared.configure_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.shared.configure_failures.store(failures - 1, Ordering::SeqCst);
            callback(Err(CaptureError::SessionConfigurationError(
                "simulated configure failure".to_string(),
            )));
            return Ok(());
        }

        let session_id = {
            let mut state = lock_unpoisoned(&self.shared.state);
            state.next_session += 1;
            state.sessions_alive += 1;
            state.sessions_created += 1;
            state.max_sessions_alive = state.max_sessions_alive.max(state.sessions_alive);
            state.next_session
        };
        log::debug!("Simulated session {} bound to {} target(s)", session_id, targets.len());
        if self.shared.hold_configures.load(Ordering::SeqCst) {
            lock_unpoisoned(&self.shared.held_configures).push((session_id, callback));
            return Ok(());
        }
        callback(Ok(Box::new(SimulatedSession {
            id: session_id,
            shared: self.shared.clone(),
        })));
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.shared.stop_pump();
        let mut state = lock_unpoisoned(&self.shared.state);
        state.device_open = None;
        state.callback = None;
        state.request = None;
        state.active_session = None;
    }
}

struct SimulatedSession {
    id: u64,
    shared: Arc<SimShared>,
}

impl CaptureSession for SimulatedSession {
    fn set_repeating_request(&mut self, request: RepeatingRequest) -> Result<()> {
        let mut state = lock_unpoisoned(&self.shared.state);
        state.request = Some(request);
        state.active_session = Some(self.id);
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<()> {
        let mut state = lock_unpoisoned(&self.shared.state);
        if state.active_session == Some(self.id) {
            state.request = None;
            state.active_session = None;
        }
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_output_rotation(&mut self, kind: TargetKind, degrees: u32) -> Result<()> {
        lock_unpoisoned(&self.shared.state).rotations.insert(kind, degrees);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut state = lock_unpoisoned(&self.shared.state);
        state.sessions_alive = state.sessions_alive.saturating_sub(1);
        if state.active_session == Some(self.id) {
            state.request = None;
            state.active_session = None;
        }
        Ok(())
    }
}

/// Software microphone producing a 440 Hz tone
pub struct SimulatedAudioSource {
    min_buffer_size: usize,
    chunk_interval: Duration,
    last_buffer_size: AtomicUsize,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl SimulatedAudioSource {
    pub fn new() -> Self {
        Self::with_min_buffer_size(3584)
    }

    pub fn with_min_buffer_size(min_buffer_size: usize) -> Self {
        Self {
            min_buffer_size,
            chunk_interval: Duration::from_millis(5),
            last_buffer_size: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Buffer size of the most recent `open`
    pub fn last_buffer_size(&self) -> usize {
        self.last_buffer_size.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for SimulatedAudioSource {
    fn min_buffer_size(&self, _sample_rate: u32) -> Result<usize> {
        Ok(self.min_buffer_size)
    }

    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Arc<dyn PcmInput>> {
        self.last_buffer_size.store(buffer_size, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatedPcmInput {
            sample_rate,
            interval: self.chunk_interval,
            stopped: Mutex::new(false),
            wake: Condvar::new(),
            chunks: AtomicU64::new(0),
            released: self.released.clone(),
        }))
    }
}

struct SimulatedPcmInput {
    sample_rate: u32,
    interval: Duration,
    stopped: Mutex<bool>,
    wake: Condvar,
    chunks: AtomicU64,
    released: Arc<AtomicUsize>,
}

impl PcmInput for SimulatedPcmInput {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let stopped = lock_unpoisoned(&self.stopped);
        let stopped = match self.wake.wait_timeout_while(stopped, self.interval, |stopped| !*stopped) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
        if *stopped {
            return Err(CaptureError::AudioError("input stopped".to_string()));
        }
        drop(stopped);

        let chunk = self.chunks.fetch_add(1, Ordering::Relaxed);
        let pcm = synthetic_pcm_chunk(chunk, buf.len() / 2, self.sample_rate);
        buf[..pcm.len()].copy_from_slice(&pcm);
        Ok(pcm.len())
    }

    fn stop(&self) {
        *lock_unpoisoned(&self.stopped) = true;
        self.wake.notify_all();
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecorderKnobs {
    auto_confirm: AtomicBool,
    fail_start: AtomicBool,
    finish_error: Mutex<Option<String>>,
    created: AtomicUsize,
    last: Mutex<Option<Arc<SimulatedRecording>>>,
}

/// Recorder writing a small text file instead of encoded video
#[derive(Clone)]
pub struct SimulatedRecorderFactory {
    knobs: Arc<RecorderKnobs>,
}

impl SimulatedRecorderFactory {
    /// Recorders confirm `start` immediately
    pub fn new() -> Self {
        let factory = Self {
            knobs: Arc::new(RecorderKnobs::default()),
        };
        factory.set_auto_confirm(true);
        factory
    }

    /// When off, `start` stays unconfirmed until [`Self::confirm_start`]
    pub fn set_auto_confirm(&self, auto: bool) {
        self.knobs.auto_confirm.store(auto, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.knobs.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Recorders report this failure when they finish
    pub fn set_finish_error(&self, message: Option<&str>) {
        *lock_unpoisoned(&self.knobs.finish_error) = message.map(str::to_string);
    }

    pub fn created(&self) -> usize {
        self.knobs.created.load(Ordering::SeqCst)
    }

    /// Report `Started` for the most recent recorder
    pub fn confirm_start(&self) {
        if let Some(recording) = lock_unpoisoned(&self.knobs.last).clone() {
            (recording.events)(RecorderEvent::Started);
        }
    }

    /// Frames received by the most recent recorder while recording
    pub fn frames_recorded(&self) -> u64 {
        lock_unpoisoned(&self.knobs.last)
            .as_ref()
            .map(|r| r.frames.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Default for SimulatedRecorderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderFactory for SimulatedRecorderFactory {
    fn create(&self, settings: &RecorderSettings, events: RecorderEvents) -> Result<Box<dyn MediaRecorder>> {
        let recording = Arc::new(SimulatedRecording {
            events,
            path: settings.output_path.clone(),
            recording: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        });
        self.knobs.created.fetch_add(1, Ordering::SeqCst);
        *lock_unpoisoned(&self.knobs.last) = Some(recording.clone());
        Ok(Box::new(SimulatedRecorder {
            recording,
            size: settings.size,
            knobs: self.knobs.clone(),
        }))
    }
}

struct SimulatedRecording {
    events: RecorderEvents,
    path: PathBuf,
    recording: AtomicBool,
    frames: AtomicU64,
}

impl FrameSink for SimulatedRecording {
    fn on_frame(&self, _frame: CapturedFrame) {
        if self.recording.load(Ordering::SeqCst) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct SimulatedRecorder {
    recording: Arc<SimulatedRecording>,
    size: Size,
    knobs: Arc<RecorderKnobs>,
}

impl MediaRecorder for SimulatedRecorder {
    fn target(&self) -> OutputTarget {
        OutputTarget::new(TargetKind::Recorder, self.size, PixelFormat::Yuv420, &self.recording)
    }

    fn start(&mut self) -> Result<()> {
        if self.knobs.fail_start.load(Ordering::SeqCst) {
            return Err(CaptureError::RecordingError("simulated start failure".to_string()));
        }
        std::fs::write(&self.recording.path, b"crabcapture simulated recording\n")?;
        self.recording.recording.store(true, Ordering::SeqCst);
        if self.knobs.auto_confirm.load(Ordering::SeqCst) {
            (self.recording.events)(RecorderEvent::Started);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.recording.recording.store(false, Ordering::SeqCst);
        let mut file = OpenOptions::new().append(true).open(&self.recording.path)?;
        writeln!(file, "frames={}", self.recording.frames.load(Ordering::SeqCst))?;

        let failure = lock_unpoisoned(&self.knobs.finish_error).clone();
        (self.recording.events)(RecorderEvent::Finished(failure));
        Ok(())
    }

    fn release(&mut self) {
        self.recording.recording.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LensFacing;

    #[test]
    fn test_enumerates_default_cameras() {
        let driver = SimulatedDriver::with_default_cameras();
        let cameras = driver.enumerate().unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[1].facing, LensFacing::Front);
    }

    #[test]
    fn test_unknown_camera_rejected() {
        let driver = SimulatedDriver::with_default_cameras();
        assert!(driver.open("nope", Box::new(|_| {})).is_err());
    }

    #[test]
    fn test_open_error_reported_through_callback() {
        let driver = SimulatedDriver::with_default_cameras();
        driver.fail_next_open(3);
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        driver
            .open(
                "sim-back",
                Box::new(move |event| {
                    if let DeviceEvent::Error(code) = event {
                        *slot.lock().unwrap() = Some(code);
                    }
                }),
            )
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(3));
        assert!(!driver.is_device_open());
    }

    #[test]
    fn test_pcm_read_unblocks_on_stop() {
        let source = SimulatedAudioSource::new();
        let input = source.open(44100, 1024).unwrap();
        let mut buf = vec![0u8; 1024];
        assert_eq!(input.read(&mut buf).unwrap(), 1024);

        input.stop();
        assert!(input.read(&mut buf).is_err());
        input.release();
        assert_eq!(source.released(), 1);
    }
}
