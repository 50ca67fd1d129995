//! Async facade over the pipeline control thread
//!
//! Every call posts a command to the worker and awaits its reply. The worker
//! itself is a plain thread so driver callbacks never need a runtime.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tokio::sync::{oneshot, Mutex};

use super::targets::{OutputTarget, TargetKind};
use super::worker::{Collaborators, Command, PipelineStatus, Worker};
use super::Responder;
use crate::audio::{AudioChunkSink, AudioSource};
use crate::config::CrabCaptureConfig;
use crate::errors::{CaptureError, Result};
use crate::image_stream::ImageFrameSink;
use crate::orientation::{DeviceRotation, OrientationData};
use crate::permissions::{Capability, PermissionInfo, PermissionProvider, SystemPermissions};
use crate::platform::{CameraDescriptor, CameraDriver};
use crate::preview::{HeadlessTextureRegistry, TextureRegistry};
use crate::recording::{RecorderFactory, VideoRecordRequest};
use crate::types::{AudioStreamRequest, CameraData, CameraRequest, ImageStreamRequest};

struct WorkerHandle {
    id: u64,
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    async fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => log::error!("Pipeline worker panicked"),
                Err(e) => log::error!("Failed to join pipeline worker: {}", e),
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // No-op when the worker already exited.
        let _ = self.commands.send(Command::Close { reply: None });
    }
}

fn not_open() -> CaptureError {
    CaptureError::InvalidState("camera is not open".to_string())
}

/// Builder for [`PipelineController`]
pub struct PipelineControllerBuilder {
    driver: Arc<dyn CameraDriver>,
    textures: Option<Arc<dyn TextureRegistry>>,
    permissions: Option<Arc<dyn PermissionProvider>>,
    audio_source: Option<Arc<dyn AudioSource>>,
    recorders: Option<Arc<dyn RecorderFactory>>,
    config: CrabCaptureConfig,
}

impl PipelineControllerBuilder {
    pub fn textures(mut self, textures: Arc<dyn TextureRegistry>) -> Self {
        self.textures = Some(textures);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn audio_source(mut self, source: Arc<dyn AudioSource>) -> Self {
        self.audio_source = Some(source);
        self
    }

    pub fn recorders(mut self, recorders: Arc<dyn RecorderFactory>) -> Self {
        self.recorders = Some(recorders);
        self
    }

    pub fn config(mut self, config: CrabCaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// Fill unset collaborators with the defaults for the enabled features.
    pub fn build(self) -> PipelineController {
        let textures = self
            .textures
            .unwrap_or_else(|| Arc::new(HeadlessTextureRegistry::new()));
        let permissions = self
            .permissions
            .unwrap_or_else(|| Arc::new(SystemPermissions::new()));

        PipelineController {
            deps: Collaborators {
                driver: self.driver,
                textures,
                permissions,
                audio_source: self.audio_source.or_else(default_audio_source),
                recorders: self.recorders.or_else(default_recorders),
                config: self.config,
            },
            worker: Mutex::new(None),
            next_worker: AtomicU64::new(0),
        }
    }
}

#[cfg(feature = "audio")]
fn default_audio_source() -> Option<Arc<dyn AudioSource>> {
    Some(Arc::new(crate::audio::CpalAudioSource::new()))
}

#[cfg(not(feature = "audio"))]
fn default_audio_source() -> Option<Arc<dyn AudioSource>> {
    None
}

#[cfg(feature = "recording")]
fn default_recorders() -> Option<Arc<dyn RecorderFactory>> {
    Some(Arc::new(crate::recording::Mp4RecorderFactory::new()))
}

#[cfg(not(feature = "recording"))]
fn default_recorders() -> Option<Arc<dyn RecorderFactory>> {
    None
}

/// Entry point for camera control.
///
/// At most one camera is open per controller. Calls may come from any task;
/// they are applied in the order the worker receives them.
pub struct PipelineController {
    deps: Collaborators,
    worker: Mutex<Option<WorkerHandle>>,
    next_worker: AtomicU64,
}

impl PipelineController {
    pub fn builder(driver: Arc<dyn CameraDriver>) -> PipelineControllerBuilder {
        PipelineControllerBuilder {
            driver,
            textures: None,
            permissions: None,
            audio_source: None,
            recorders: None,
            config: CrabCaptureConfig::default(),
        }
    }

    pub fn config(&self) -> &CrabCaptureConfig {
        &self.deps.config
    }

    /// Cameras the driver can see
    pub async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        let driver = self.deps.driver.clone();
        tokio::task::spawn_blocking(move || driver.enumerate())
            .await
            .map_err(|e| CaptureError::DeviceError(format!("Camera enumeration task failed: {}", e)))?
    }

    pub fn permission_status(&self, capability: Capability) -> PermissionInfo {
        self.deps.permissions.status(capability)
    }

    /// Ask for access, resolving with whether it was granted
    pub async fn request_access(&self, capability: Capability) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.deps.permissions.request_access(
            capability,
            Box::new(move |granted| {
                let _ = tx.send(granted);
            }),
        );
        rx.await
            .map_err(|_| CaptureError::PermissionDenied(format!("{} request was abandoned", capability)))
    }

    /// Open a camera and configure its preview session.
    ///
    /// Resolves once the first session has been configured (or failed to).
    pub async fn open(&self, request: CameraRequest) -> Result<CameraData> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut slot = self.worker.lock().await;
            if slot.is_some() {
                return Err(CaptureError::InvalidState("camera is already open".to_string()));
            }

            let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
            let (commands, queue) = crossbeam_channel::unbounded();
            let worker = Worker::new(self.deps.clone(), commands.clone());
            let thread = std::thread::Builder::new()
                .name("crabcapture-pipeline".to_string())
                .spawn(move || worker.run(queue))
                .map_err(|e| CaptureError::ResourceUnavailable(format!("Failed to spawn pipeline: {}", e)))?;

            commands
                .send(Command::Open { request, reply: tx })
                .map_err(|_| CaptureError::InvalidState("pipeline exited before open".to_string()))?;
            *slot = Some(WorkerHandle {
                id,
                commands,
                thread: Some(thread),
            });
            id
        };

        let result = rx
            .await
            .unwrap_or_else(|_| Err(CaptureError::DeviceError("pipeline closed while opening".to_string())));
        if result.is_err() {
            self.reap(id).await;
        }
        result
    }

    /// Drop the worker handle when it still belongs to the failed open
    async fn reap(&self, id: u64) {
        let handle = {
            let mut slot = self.worker.lock().await;
            match slot.as_ref() {
                Some(handle) if handle.id == id => slot.take(),
                _ => None,
            }
        };
        if let Some(handle) = handle {
            handle.join().await;
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Responder<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        {
            let slot = self.worker.lock().await;
            let handle = slot.as_ref().ok_or_else(not_open)?;
            handle.commands.send(command(tx)).map_err(|_| not_open())?;
        }
        rx.await
            .map_err(|_| CaptureError::InvalidState("pipeline stopped before replying".to_string()))?
    }

    /// Release every resource and stop the control thread. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let handle = self.worker.lock().await.take();
        let Some(handle) = handle else {
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        if handle.commands.send(Command::Close { reply: Some(tx) }).is_ok() {
            // An exited worker has already released everything.
            let _ = rx.await;
        }
        handle.join().await;
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    pub async fn status(&self) -> PipelineStatus {
        let (tx, rx) = oneshot::channel();
        let sent = {
            let slot = self.worker.lock().await;
            slot.as_ref()
                .map(|handle| handle.commands.send(Command::Status { reply: tx }).is_ok())
                .unwrap_or(false)
        };
        if !sent {
            return PipelineStatus::closed();
        }
        rx.await.unwrap_or_else(|_| PipelineStatus::closed())
    }

    /// Attach an extra output and rebuild the session around it
    pub async fn attach(&self, target: OutputTarget) -> Result<()> {
        self.request(|reply| Command::Attach { target, reply }).await
    }

    pub async fn detach(&self, kind: TargetKind) -> Result<()> {
        self.request(|reply| Command::Detach { kind, reply }).await
    }

    pub async fn start_image_stream(&self, request: ImageStreamRequest, sink: Arc<dyn ImageFrameSink>) -> Result<()> {
        self.request(|reply| Command::StartImageStream { request, sink, reply })
            .await
    }

    pub async fn stop_image_stream(&self) -> Result<()> {
        self.request(|reply| Command::StopImageStream { reply }).await
    }

    pub async fn start_audio_stream(&self, request: AudioStreamRequest, sink: Arc<dyn AudioChunkSink>) -> Result<()> {
        self.request(|reply| Command::StartAudioStream { request, sink, reply })
            .await
    }

    pub async fn stop_audio_stream(&self) -> Result<()> {
        self.request(|reply| Command::StopAudioStream { reply }).await
    }

    /// Start recording; resolves with the output file once the recorder is running
    pub async fn start_recording(&self, request: VideoRecordRequest) -> Result<PathBuf> {
        self.request(|reply| Command::StartRecording { request, reply }).await
    }

    /// Stop recording; resolves with the finished file
    pub async fn stop_recording(&self) -> Result<PathBuf> {
        self.request(|reply| Command::StopRecording { reply }).await
    }

    /// Apply a device rotation given in degrees (0, 90, 180 or 270)
    pub async fn update_orientation(&self, degrees: i32) -> Result<OrientationData> {
        let rotation = DeviceRotation::from_degrees(degrees)?;
        self.request(|reply| Command::UpdateOrientation { rotation, reply })
            .await
    }

    pub async fn orientation_data(&self) -> Result<OrientationData> {
        self.request(|reply| Command::Orientation { reply }).await
    }
}
