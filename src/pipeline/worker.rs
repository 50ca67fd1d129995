//! Pipeline control thread
//!
//! One [`Worker`] exists per successful `open`. It is the only owner of the device
//! handle, the capture session and the active target set, and processes commands
//! strictly in arrival order. Hardware callbacks never touch this state directly;
//! they post [`Command`]s back onto the same queue.

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::request::RepeatingRequest;
use super::targets::{ActiveTargetSet, OutputTarget, TargetKind};
use super::{respond, Responder};
use crate::audio::{AudioChunkSink, AudioSource, AudioStreamController, AudioStreamState};
use crate::config::CrabCaptureConfig;
use crate::errors::{CaptureError, Result};
use crate::image_stream::{ImageFrameSink, ImageStreamMultiplexer, ImageStreamState};
use crate::negotiation::{negotiate, NegotiatedFormat};
use crate::orientation::{resolve, DeviceRotation, OrientationData, RotationCell};
use crate::permissions::{self, Capability, PermissionProvider};
use crate::platform::{CameraDescriptor, CameraDevice, CameraDriver, CaptureSession, DeviceEvent};
use crate::preview::{PreviewOutput, TextureId, TextureRegistry};
use crate::recording::{
    unique_output_path, EventOutcome, RecorderEvent, RecorderFactory, RecorderSettings, RecordingState,
    VideoRecordRequest, VideoRecordingController,
};
use crate::types::{AudioStreamRequest, CameraData, CameraRequest, ImageStreamRequest, Size};

/// Lifecycle of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Closed,
    /// Device open requested, waiting for the driver
    Opening,
    /// Device open, no configured session
    Open,
    /// Session configured and repeating request running
    SessionReady,
}

/// Diagnostic snapshot of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub active_targets: Vec<TargetKind>,
    /// Incremented on every rebuild
    pub session_generation: u64,
    pub image_stream: ImageStreamState,
    pub audio_stream: AudioStreamState,
    pub recording: RecordingState,
    pub video_size: Option<Size>,
    pub video_frame_rate: Option<u32>,
    pub texture_id: Option<TextureId>,
    /// Frames seen by the image stream since it last started
    pub image_frames: u64,
}

impl PipelineStatus {
    pub fn closed() -> Self {
        Self {
            state: PipelineState::Closed,
            active_targets: Vec::new(),
            session_generation: 0,
            image_stream: ImageStreamState::Uninitialized,
            audio_stream: AudioStreamState::Inactive,
            recording: RecordingState::Idle,
            video_size: None,
            video_frame_rate: None,
            texture_id: None,
            image_frames: 0,
        }
    }
}

pub(crate) enum Command {
    Open {
        request: CameraRequest,
        reply: Responder<CameraData>,
    },
    Attach {
        target: OutputTarget,
        reply: Responder<()>,
    },
    Detach {
        kind: TargetKind,
        reply: Responder<()>,
    },
    StartImageStream {
        request: ImageStreamRequest,
        sink: Arc<dyn ImageFrameSink>,
        reply: Responder<()>,
    },
    StopImageStream {
        reply: Responder<()>,
    },
    StartAudioStream {
        request: AudioStreamRequest,
        sink: Arc<dyn AudioChunkSink>,
        reply: Responder<()>,
    },
    StopAudioStream {
        reply: Responder<()>,
    },
    StartRecording {
        request: VideoRecordRequest,
        reply: Responder<PathBuf>,
    },
    StopRecording {
        reply: Responder<PathBuf>,
    },
    UpdateOrientation {
        rotation: DeviceRotation,
        reply: Responder<OrientationData>,
    },
    Orientation {
        reply: Responder<OrientationData>,
    },
    Status {
        reply: oneshot::Sender<PipelineStatus>,
    },
    Close {
        reply: Option<Responder<()>>,
    },
    Device(DeviceEvent),
    SessionConfigured {
        generation: u64,
        result: Result<Box<dyn CaptureSession>>,
    },
    Recorder {
        id: u64,
        event: RecorderEvent,
    },
}

/// Work deferred until the in-flight rebuild settles
enum AfterRebuild {
    Open,
    Reply(Responder<()>),
    StartRecording,
}

/// Collaborators handed to every worker
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub driver: Arc<dyn CameraDriver>,
    pub textures: Arc<dyn TextureRegistry>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub audio_source: Option<Arc<dyn AudioSource>>,
    pub recorders: Option<Arc<dyn RecorderFactory>>,
    pub config: CrabCaptureConfig,
}

pub(crate) struct Worker {
    deps: Collaborators,
    queue: Sender<Command>,
    state: PipelineState,
    exit: bool,

    pending_open: Option<Responder<CameraData>>,
    camera: Option<CameraDescriptor>,
    format: Option<NegotiatedFormat>,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    generation: u64,
    rebuild_in_flight: bool,
    after_rebuild: Vec<AfterRebuild>,
    targets: ActiveTargetSet,

    preview: Option<PreviewOutput>,
    image_stream: Option<ImageStreamMultiplexer>,
    audio: Option<AudioStreamController>,
    recording: Option<VideoRecordingController>,

    rotation: RotationCell,
    orientation: Option<OrientationData>,
}

impl Worker {
    pub(crate) fn new(deps: Collaborators, queue: Sender<Command>) -> Self {
        let audio = deps
            .audio_source
            .clone()
            .map(|source| AudioStreamController::new(source, deps.permissions.clone()));
        let recording = deps.recorders.clone().map(VideoRecordingController::new);

        Self {
            deps,
            queue,
            state: PipelineState::Closed,
            exit: false,
            pending_open: None,
            camera: None,
            format: None,
            device: None,
            session: None,
            generation: 0,
            rebuild_in_flight: false,
            after_rebuild: Vec::new(),
            targets: ActiveTargetSet::new(),
            preview: None,
            image_stream: None,
            audio,
            recording,
            rotation: RotationCell::default(),
            orientation: None,
        }
    }

    pub(crate) fn run(mut self, commands: Receiver<Command>) {
        log::debug!("Pipeline worker started");
        for command in commands.iter() {
            self.handle(command);
            if self.exit {
                break;
            }
        }
        self.close_all();
        log::debug!("Pipeline worker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open { request, reply } => self.open(request, reply),
            Command::Attach { target, reply } => self.attach(target, reply),
            Command::Detach { kind, reply } => self.detach(kind, reply),
            Command::StartImageStream { request, sink, reply } => self.start_image_stream(request, sink, reply),
            Command::StopImageStream { reply } => self.stop_image_stream(reply),
            Command::StartAudioStream { request, sink, reply } => {
                let result = match self.audio.as_mut() {
                    Some(audio) => audio.start(request, sink),
                    None => Err(CaptureError::ResourceUnavailable("no audio source configured".to_string())),
                };
                respond(reply, result);
            }
            Command::StopAudioStream { reply } => {
                if let Some(audio) = self.audio.as_mut() {
                    audio.stop();
                }
                respond(reply, Ok(()));
            }
            Command::StartRecording { request, reply } => self.start_recording(request, reply),
            Command::StopRecording { reply } => match self.recording.as_mut() {
                Some(recording) => {
                    if recording.stop(reply) == EventOutcome::Finished {
                        self.detach_quietly(TargetKind::Recorder);
                    }
                }
                None => respond(reply, Err(CaptureError::NotRecording("no recorder configured".to_string()))),
            },
            Command::UpdateOrientation { rotation, reply } => {
                let result = self.update_orientation(rotation);
                respond(reply, result);
            }
            Command::Orientation { reply } => {
                let result = self
                    .orientation
                    .ok_or_else(|| CaptureError::InvalidState("camera is not open".to_string()));
                respond(reply, result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Close { reply } => {
                self.close_all();
                self.exit = true;
                if let Some(reply) = reply {
                    respond(reply, Ok(()));
                }
            }
            Command::Device(event) => self.on_device_event(event),
            Command::SessionConfigured { generation, result } => self.on_session_configured(generation, result),
            Command::Recorder { id, event } => self.on_recorder_event(id, event),
        }
    }

    fn is_configured(&self) -> bool {
        matches!(self.state, PipelineState::Open | PipelineState::SessionReady)
    }

    fn require_configured(&self) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(CaptureError::InvalidState(format!("pipeline is {:?}", self.state)))
        }
    }

    fn open(&mut self, request: CameraRequest, reply: Responder<CameraData>) {
        if self.state != PipelineState::Closed {
            respond(reply, Err(CaptureError::InvalidState("camera is already open".to_string())));
            return;
        }
        match self.begin_open(&request) {
            Ok(()) => {
                self.pending_open = Some(reply);
                self.state = PipelineState::Opening;
            }
            Err(e) => {
                log::error!("Open failed: {}", e);
                self.release_outputs();
                self.exit = true;
                respond(reply, Err(e));
            }
        }
    }

    fn begin_open(&mut self, request: &CameraRequest) -> Result<()> {
        permissions::require(self.deps.permissions.as_ref(), Capability::Camera)?;

        let cameras = self.deps.driver.enumerate()?;
        let camera = cameras.get(request.camera_index).cloned().ok_or_else(|| {
            CaptureError::DeviceError(format!(
                "camera index {} out of range ({} available)",
                request.camera_index,
                cameras.len()
            ))
        })?;
        let format = negotiate(&camera.formats, request.video_size, request.video_frame_rate)?;

        let preview = PreviewOutput::new(self.deps.textures.clone(), format.size)?;
        let image_stream = ImageStreamMultiplexer::new(
            format.size,
            request.image_stream_format,
            self.deps.config.image_stream.max_images,
            self.rotation.clone(),
        );
        let orientation = resolve(DeviceRotation::Deg0, camera.sensor_orientation, camera.facing);
        self.rotation.set(orientation.rotation_degrees);

        log::info!(
            "Opening {} ({}) at {}@{}",
            camera.name,
            camera.id,
            format.size,
            format.frame_rate
        );
        self.preview = Some(preview);
        self.image_stream = Some(image_stream);
        self.orientation = Some(orientation);
        self.format = Some(format);
        self.camera = Some(camera.clone());

        let queue = self.queue.clone();
        self.deps.driver.open(
            &camera.id,
            Box::new(move |event| {
                if queue.send(Command::Device(event)).is_err() {
                    log::debug!("Device event after pipeline shutdown");
                }
            }),
        )
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Opened(device) => self.on_opened(device),
            DeviceEvent::Disconnected if self.state == PipelineState::Opening => {
                self.fail_open(CaptureError::DeviceError("camera disconnected while opening".to_string()));
            }
            DeviceEvent::Error(code) if self.state == PipelineState::Opening => {
                self.fail_open(CaptureError::DeviceError(format!("camera failed to open (error {})", code)));
            }
            DeviceEvent::Disconnected => log::warn!("Camera disconnected; close the pipeline to release it"),
            DeviceEvent::Error(code) => log::error!("Camera error {}; close the pipeline to release it", code),
        }
    }

    fn on_opened(&mut self, mut device: Box<dyn CameraDevice>) {
        if self.state != PipelineState::Opening || self.device.is_some() {
            log::warn!("Closing unexpected device {}", device.id());
            device.close();
            return;
        }

        let Some(format) = self.format.clone() else {
            device.close();
            self.fail_open(CaptureError::InvalidState("no negotiated format".to_string()));
            return;
        };
        if let Err(e) = device.configure_format(&format) {
            device.close();
            self.fail_open(CaptureError::DeviceError(format!("format configuration failed: {}", e)));
            return;
        }

        log::info!("Camera {} opened", device.id());
        self.device = Some(device);
        self.state = PipelineState::Open;
        if let Some(preview) = &self.preview {
            self.targets.attach(preview.target());
        }
        self.rebuild_then(AfterRebuild::Open);
    }

    fn fail_open(&mut self, error: CaptureError) {
        log::error!("Open failed: {}", error);
        if let Some(reply) = self.pending_open.take() {
            respond(reply, Err(error));
        }
        self.close_all();
        self.exit = true;
    }

    fn camera_data(&self) -> Result<CameraData> {
        let preview = self
            .preview
            .as_ref()
            .ok_or_else(|| CaptureError::ResourceUnavailable("preview output missing".to_string()))?;
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidState("no negotiated format".to_string()))?;

        Ok(CameraData {
            texture_id: preview.texture_id(),
            video_size: format.size,
            video_frame_rate: format.frame_rate,
            supported_sizes: format.capabilities.sizes().to_vec(),
            supported_fps: format.supported_fps(),
        })
    }

    fn attach(&mut self, target: OutputTarget, reply: Responder<()>) {
        if let Err(e) = self.require_configured() {
            respond(reply, Err(e));
            return;
        }
        if !self.targets.attach(target) {
            respond(reply, Ok(()));
            return;
        }
        self.rebuild_then(AfterRebuild::Reply(reply));
    }

    fn detach(&mut self, kind: TargetKind, reply: Responder<()>) {
        if let Err(e) = self.require_configured() {
            respond(reply, Err(e));
            return;
        }
        if !self.targets.detach(kind) {
            respond(reply, Ok(()));
            return;
        }
        self.rebuild_then(AfterRebuild::Reply(reply));
    }

    /// Detach without a caller waiting on the outcome
    fn detach_quietly(&mut self, kind: TargetKind) {
        if self.targets.detach(kind) && self.is_configured() {
            self.rebuild();
        }
    }

    /// Queue `next` behind a fresh rebuild
    fn rebuild_then(&mut self, next: AfterRebuild) {
        self.after_rebuild.push(next);
        self.rebuild();
    }

    /// Tear the current session down and configure a new one over the live targets.
    fn rebuild(&mut self) {
        self.teardown_session();
        self.generation += 1;
        let generation = self.generation;

        let targets = self.targets.live_targets();
        let device = match self.device.as_mut() {
            Some(device) if !targets.is_empty() => device,
            _ => {
                log::debug!("No device or no live targets, leaving the session down");
                self.rebuild_in_flight = false;
                self.settle();
                return;
            }
        };

        log::debug!(
            "Rebuilding session {} for {:?}",
            generation,
            targets.iter().map(|t| t.kind()).collect::<Vec<_>>()
        );
        let queue = self.queue.clone();
        let issued = device.create_session(
            targets,
            Box::new(move |result| {
                if queue.send(Command::SessionConfigured { generation, result }).is_err() {
                    log::debug!("Session configured after pipeline shutdown");
                }
            }),
        );
        match issued {
            Ok(()) => self.rebuild_in_flight = true,
            Err(e) => {
                log::error!("{}", CaptureError::SessionConfigurationError(e.to_string()));
                self.rebuild_in_flight = false;
                self.settle();
            }
        }
    }

    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stop_repeating() {
                log::warn!("stop_repeating failed: {}", e);
            }
            if let Err(e) = session.abort_captures() {
                log::warn!("abort_captures failed: {}", e);
            }
            if let Err(e) = session.close() {
                log::warn!("Ignoring session close failure: {}", e);
            }
        }
        if self.state == PipelineState::SessionReady {
            self.state = PipelineState::Open;
        }
    }

    fn on_session_configured(&mut self, generation: u64, result: Result<Box<dyn CaptureSession>>) {
        if generation != self.generation || self.device.is_none() {
            if let Ok(session) = result {
                log::debug!("Closing stale session {}", generation);
                if let Err(e) = session.close() {
                    log::warn!("Stale session close failed: {}", e);
                }
            }
            return;
        }
        self.rebuild_in_flight = false;

        match result {
            Ok(mut session) => {
                let frame_rate = self.format.as_ref().map(|f| f.frame_rate).unwrap_or_default();
                let request = RepeatingRequest::for_targets(self.targets.live_targets(), frame_rate);
                let template = request.template;
                match session.set_repeating_request(request) {
                    Ok(()) => {
                        self.apply_output_rotation(session.as_mut());
                        self.state = PipelineState::SessionReady;
                        log::debug!("Session {} ready ({:?})", generation, template);
                    }
                    Err(e) => log::error!("Repeating request rejected for session {}: {}", generation, e),
                }
                self.session = Some(session);
            }
            Err(e) => log::error!(
                "{}",
                CaptureError::SessionConfigurationError(format!("session {}: {}", generation, e))
            ),
        }
        self.settle();
    }

    fn settle(&mut self) {
        if self.rebuild_in_flight {
            return;
        }
        for next in std::mem::take(&mut self.after_rebuild) {
            match next {
                AfterRebuild::Open => {
                    if let Some(reply) = self.pending_open.take() {
                        respond(reply, self.camera_data());
                    }
                }
                AfterRebuild::Reply(reply) => respond(reply, Ok(())),
                AfterRebuild::StartRecording => {
                    let started = self.recording.as_mut().map(|r| r.start()).unwrap_or(false);
                    if !started {
                        self.detach_quietly(TargetKind::Recorder);
                    }
                }
            }
        }
    }

    fn apply_output_rotation(&self, session: &mut dyn CaptureSession) {
        let Some(orientation) = &self.orientation else {
            return;
        };
        for kind in [TargetKind::Preview, TargetKind::Recorder] {
            if self.targets.contains(kind) {
                if let Err(e) = session.set_output_rotation(kind, orientation.display_orientation_degrees) {
                    log::warn!("Failed to rotate {} output: {}", kind, e);
                }
            }
        }
    }

    fn update_orientation(&mut self, rotation: DeviceRotation) -> Result<OrientationData> {
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidState("camera is not open".to_string()))?;
        let orientation = resolve(rotation, camera.sensor_orientation, camera.facing);
        self.rotation.set(orientation.rotation_degrees);
        self.orientation = Some(orientation);

        if let Some(mut session) = self.session.take() {
            self.apply_output_rotation(session.as_mut());
            self.session = Some(session);
        }
        log::debug!("Orientation updated: {:?}", orientation);
        Ok(orientation)
    }

    fn start_image_stream(&mut self, request: ImageStreamRequest, sink: Arc<dyn ImageFrameSink>, reply: Responder<()>) {
        if let Err(e) = self.require_configured() {
            respond(reply, Err(e));
            return;
        }
        let Some(stream) = self.image_stream.as_mut() else {
            respond(reply, Err(CaptureError::ResourceUnavailable("image reader not initialized".to_string())));
            return;
        };
        let target = match stream.target() {
            Ok(target) => target,
            Err(e) => {
                respond(reply, Err(e));
                return;
            }
        };
        if let Err(e) = stream.start(request, sink) {
            respond(reply, Err(e));
            return;
        }

        if self.targets.attach(target) {
            self.rebuild_then(AfterRebuild::Reply(reply));
        } else {
            respond(reply, Ok(()));
        }
    }

    fn stop_image_stream(&mut self, reply: Responder<()>) {
        if let Some(stream) = self.image_stream.as_mut() {
            stream.stop();
        }
        if self.targets.detach(TargetKind::ImageStream) && self.is_configured() {
            self.rebuild_then(AfterRebuild::Reply(reply));
        } else {
            respond(reply, Ok(()));
        }
    }

    fn start_recording(&mut self, request: VideoRecordRequest, reply: Responder<PathBuf>) {
        match self.recording_settings(&request) {
            Ok(settings) => {
                let queue = self.queue.clone();
                let notify = Arc::new(move |id: u64, event: RecorderEvent| {
                    if queue.send(Command::Recorder { id, event }).is_err() {
                        log::debug!("Recorder event after pipeline shutdown");
                    }
                });
                let Some(recording) = self.recording.as_mut() else {
                    respond(reply, Err(CaptureError::ResourceUnavailable("no recorder configured".to_string())));
                    return;
                };
                if let Some(target) = recording.prepare(&settings, notify, reply) {
                    self.targets.attach(target);
                    self.rebuild_then(AfterRebuild::StartRecording);
                }
            }
            Err(e) => respond(reply, Err(e)),
        }
    }

    fn recording_settings(&self, request: &VideoRecordRequest) -> Result<RecorderSettings> {
        self.require_configured()?;
        let recording = self
            .recording
            .as_ref()
            .ok_or_else(|| CaptureError::ResourceUnavailable("no recorder configured".to_string()))?;
        if recording.state() != RecordingState::Idle {
            return Err(CaptureError::AlreadyRecording("a recording is already in progress".to_string()));
        }
        request.validate()?;
        if request.audio_enabled {
            permissions::require(self.deps.permissions.as_ref(), Capability::Microphone)?;
        }

        let format = self
            .format
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidState("no negotiated format".to_string()))?;
        let path = unique_output_path(&request.output_directory, request.container)?;
        Ok(RecorderSettings::new(
            request,
            path,
            format.size,
            format.frame_rate,
            self.rotation.get(),
        ))
    }

    fn on_recorder_event(&mut self, id: u64, event: RecorderEvent) {
        let outcome = match self.recording.as_mut() {
            Some(recording) => recording.handle_event(id, event),
            None => EventOutcome::Ignored,
        };
        if outcome == EventOutcome::Finished {
            self.detach_quietly(TargetKind::Recorder);
        }
    }

    fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.state,
            active_targets: self.targets.kinds(),
            session_generation: self.generation,
            image_stream: self
                .image_stream
                .as_ref()
                .map(|s| s.state())
                .unwrap_or(ImageStreamState::Uninitialized),
            audio_stream: self
                .audio
                .as_ref()
                .map(|a| a.state())
                .unwrap_or(AudioStreamState::Inactive),
            recording: self
                .recording
                .as_ref()
                .map(|r| r.state())
                .unwrap_or(RecordingState::Idle),
            video_size: self.format.as_ref().map(|f| f.size),
            video_frame_rate: self.format.as_ref().map(|f| f.frame_rate),
            texture_id: self.preview.as_ref().map(|p| p.texture_id()),
            image_frames: self.image_stream.as_ref().map(|s| s.frame_counter()).unwrap_or(0),
        }
    }

    fn release_outputs(&mut self) {
        if let Some(preview) = self.preview.take() {
            preview.release();
        }
        if let Some(mut stream) = self.image_stream.take() {
            stream.deinitialize();
        }
    }

    /// Release everything in shutdown order. Safe to call repeatedly.
    fn close_all(&mut self) {
        self.teardown_session();

        self.targets.detach(TargetKind::Preview);
        if let Some(preview) = self.preview.take() {
            preview.release();
        }

        self.targets.detach(TargetKind::ImageStream);
        if let Some(mut stream) = self.image_stream.take() {
            stream.deinitialize();
        }

        self.targets.detach(TargetKind::Recorder);
        if let Some(recording) = self.recording.as_mut() {
            recording.release();
        }

        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }

        if let Some(device) = self.device.take() {
            device.close();
        }

        self.targets.clear();
        for next in std::mem::take(&mut self.after_rebuild) {
            if let AfterRebuild::Reply(reply) = next {
                respond(reply, Err(CaptureError::InvalidState("pipeline closed".to_string())));
            }
        }
        if let Some(reply) = self.pending_open.take() {
            respond(reply, Err(CaptureError::DeviceError("pipeline closed while opening".to_string())));
        }
        self.rebuild_in_flight = false;
        if self.state != PipelineState::Closed {
            log::info!("Pipeline closed");
        }
        self.state = PipelineState::Closed;
    }
}
