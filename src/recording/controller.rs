//! Video recording state machine
//!
//! `start` is only confirmed once the recorder reports [`RecorderEvent::Started`];
//! `stop` completes on [`RecorderEvent::Finished`]. A finish that arrives while a
//! start is still unconfirmed fails that start, so no caller is left hanging when
//! a stop races the confirmation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::config::RecorderSettings;
use crate::errors::{CaptureError, Result};
use crate::pipeline::targets::OutputTarget;
use crate::pipeline::{respond, Responder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Idle,
    /// Recorder prepared and its target attached; start not yet confirmed
    Preparing,
    Recording,
}

/// Asynchronous notifications from a recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Started,
    /// Recording ended; carries the failure message if finalizing failed
    Finished(Option<String>),
}

/// Callback a recorder uses to report events, from any thread
pub type RecorderEvents = Arc<dyn Fn(RecorderEvent) + Send + Sync>;

/// A file recorder fed by an output target
pub trait MediaRecorder: Send {
    /// Surface the pipeline attaches as the recorder target
    fn target(&self) -> OutputTarget;

    /// Begin recording. Confirmation arrives as [`RecorderEvent::Started`].
    fn start(&mut self) -> Result<()>;

    /// Finish recording. Completion arrives as [`RecorderEvent::Finished`].
    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

pub trait RecorderFactory: Send + Sync {
    fn create(&self, settings: &RecorderSettings, events: RecorderEvents) -> Result<Box<dyn MediaRecorder>>;
}

/// What the pipeline should do after an event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Event from a recorder that is no longer current
    Ignored,
    Started,
    /// Recorder released; its target must be detached
    Finished,
}

pub struct VideoRecordingController {
    factory: Arc<dyn RecorderFactory>,
    state: RecordingState,
    recorder: Option<Box<dyn MediaRecorder>>,
    recorder_id: u64,
    started: bool,
    output_path: Option<PathBuf>,
    pending_start: Option<Responder<PathBuf>>,
    pending_stop: Option<Responder<PathBuf>>,
}

impl VideoRecordingController {
    pub fn new(factory: Arc<dyn RecorderFactory>) -> Self {
        Self {
            factory,
            state: RecordingState::Idle,
            recorder: None,
            recorder_id: 0,
            started: false,
            output_path: None,
            pending_start: None,
            pending_stop: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output_path.as_ref()
    }

    /// Create and configure a recorder, holding `reply` until the recorder confirms
    /// it started. `notify` receives recorder events tagged with the recorder id so
    /// late events from a replaced recorder can be told apart. On failure `reply`
    /// is resolved with the error and `None` is returned.
    pub fn prepare(
        &mut self,
        settings: &RecorderSettings,
        notify: Arc<dyn Fn(u64, RecorderEvent) + Send + Sync>,
        reply: Responder<PathBuf>,
    ) -> Option<OutputTarget> {
        if self.state != RecordingState::Idle {
            respond(
                reply,
                Err(CaptureError::AlreadyRecording("a recording is already in progress".to_string())),
            );
            return None;
        }

        self.recorder_id += 1;
        let id = self.recorder_id;
        let events: RecorderEvents = Arc::new(move |event| notify(id, event));
        let recorder = match self.factory.create(settings, events) {
            Ok(recorder) => recorder,
            Err(e) => {
                log::error!("Failed to create recorder: {}", e);
                respond(reply, Err(e));
                return None;
            }
        };
        let target = recorder.target();

        log::info!("Recorder {} prepared for {:?}", id, settings.output_path);
        self.recorder = Some(recorder);
        self.started = false;
        self.output_path = Some(settings.output_path.clone());
        self.pending_start = Some(reply);
        self.state = RecordingState::Preparing;
        Some(target)
    }

    /// Start the prepared recorder once its target is part of the session.
    ///
    /// Returns false when the recorder is gone or refused to start; pending callers
    /// have been failed and the recorder released in that case.
    pub fn start(&mut self) -> bool {
        let Some(recorder) = self.recorder.as_mut() else {
            return false;
        };
        if self.pending_start.is_none() {
            // Start abandoned before the session was ready.
            self.reset();
            return false;
        }

        if let Err(e) = recorder.start() {
            log::error!("Recorder {} failed to start: {}", self.recorder_id, e);
            self.fail_pending(&e.to_string());
            self.reset();
            return false;
        }
        self.started = true;

        if self.pending_stop.is_some() {
            // A stop arrived while the session was being rebuilt.
            if let Err(e) = recorder.stop() {
                log::error!("Recorder {} failed to stop: {}", self.recorder_id, e);
                self.fail_pending(&e.to_string());
                self.reset();
                return false;
            }
        }
        true
    }

    /// Request the recorder to finish. `reply` resolves on the finish event.
    ///
    /// Returns [`EventOutcome::Finished`] when the recorder refused to stop and was
    /// released on the spot; its target must then be detached by the caller.
    pub fn stop(&mut self, reply: Responder<PathBuf>) -> EventOutcome {
        let stoppable = match self.state {
            RecordingState::Recording => true,
            RecordingState::Preparing => self.pending_start.is_some(),
            RecordingState::Idle => false,
        };
        if !stoppable || self.pending_stop.is_some() {
            respond(reply, Err(CaptureError::NotRecording("no recording in progress".to_string())));
            return EventOutcome::Ignored;
        }

        self.pending_stop = Some(reply);
        if !self.started {
            log::debug!("Stop requested before recorder {} started", self.recorder_id);
            return EventOutcome::Ignored;
        }

        let Some(recorder) = self.recorder.as_mut() else {
            return EventOutcome::Ignored;
        };
        match recorder.stop() {
            Ok(()) => EventOutcome::Ignored,
            Err(e) => {
                log::error!("Recorder {} failed to stop: {}", self.recorder_id, e);
                self.fail_pending(&e.to_string());
                self.reset();
                EventOutcome::Finished
            }
        }
    }

    pub fn handle_event(&mut self, recorder_id: u64, event: RecorderEvent) -> EventOutcome {
        if recorder_id != self.recorder_id || self.recorder.is_none() {
            log::debug!("Ignoring {:?} from stale recorder {}", event, recorder_id);
            return EventOutcome::Ignored;
        }

        match event {
            RecorderEvent::Started => {
                if self.state == RecordingState::Preparing && self.pending_stop.is_none() {
                    self.state = RecordingState::Recording;
                }
                if self.pending_stop.is_none() {
                    if let Some(start) = self.pending_start.take() {
                        let path = self.output_path.clone().unwrap_or_default();
                        log::info!("Recording started: {:?}", path);
                        respond(start, Ok(path));
                    }
                }
                EventOutcome::Started
            }
            RecorderEvent::Finished(failure) => {
                if let Some(start) = self.pending_start.take() {
                    respond(
                        start,
                        Err(CaptureError::RecordingError("recording finished before it started".to_string())),
                    );
                }
                let path = self.output_path.clone().unwrap_or_default();
                match (self.pending_stop.take(), failure) {
                    (Some(stop), None) => {
                        log::info!("Recording finished: {:?}", path);
                        respond(stop, Ok(path));
                    }
                    (Some(stop), Some(message)) => {
                        log::error!("Recording failed: {}", message);
                        respond(stop, Err(CaptureError::RecordingError(message)));
                    }
                    (None, failure) => {
                        log::warn!("Recorder finished without a stop request ({:?})", failure);
                    }
                }
                self.reset();
                EventOutcome::Finished
            }
        }
    }

    /// Stop any recording in progress and release the recorder.
    ///
    /// Callers still waiting are resolved immediately since no further recorder
    /// events will be processed.
    pub fn release(&mut self) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };

        let running = self.state == RecordingState::Recording || self.pending_start.is_some();
        if self.started && running && self.pending_stop.is_none() {
            log::info!("Auto-stopping recording {}", self.recorder_id);
            if let Err(e) = recorder.stop() {
                log::warn!("Auto-stop failed: {}", e);
            }
        }
        if let Some(start) = self.pending_start.take() {
            respond(start, Err(CaptureError::RecordingError("pipeline closed".to_string())));
        }
        if let Some(stop) = self.pending_stop.take() {
            respond(stop, Ok(self.output_path.clone().unwrap_or_default()));
        }
        self.reset();
    }

    fn fail_pending(&mut self, message: &str) {
        if let Some(start) = self.pending_start.take() {
            respond(start, Err(CaptureError::RecordingError(message.to_string())));
        }
        if let Some(stop) = self.pending_stop.take() {
            respond(stop, Err(CaptureError::RecordingError(message.to_string())));
        }
    }

    fn reset(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            recorder.release();
        }
        self.started = false;
        self.state = RecordingState::Idle;
    }
}

impl Drop for VideoRecordingController {
    fn drop(&mut self) {
        self.release();
    }
}
