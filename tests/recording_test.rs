//! Video recording tests against the simulated recorder
//!
//! Run with: cargo test --test recording_test

use std::sync::Arc;
use std::time::Duration;

use crabcapture::permissions::{PermissionStatus, StaticPermissions};
use crabcapture::pipeline::RequestTemplate;
use crabcapture::platform::simulated::{SimulatedDriver, SimulatedRecorderFactory};
use crabcapture::recording::{Container, RecordingState, VideoRecordRequest};
use crabcapture::{
    CameraRequest, CaptureError, PipelineController, PipelineState, PipelineStatus, Size, TargetKind,
};
use tempfile::tempdir;

struct Fixture {
    controller: Arc<PipelineController>,
    driver: SimulatedDriver,
    recorders: SimulatedRecorderFactory,
}

async fn open_with(permissions: StaticPermissions) -> Fixture {
    let driver = SimulatedDriver::with_default_cameras();
    let recorders = SimulatedRecorderFactory::new();
    let controller = PipelineController::builder(Arc::new(driver.clone()))
        .permissions(Arc::new(permissions))
        .recorders(Arc::new(recorders.clone()))
        .build();
    controller
        .open(CameraRequest::new(0, Size::new(1280, 720), 30))
        .await
        .unwrap();
    Fixture {
        controller: Arc::new(controller),
        driver,
        recorders,
    }
}

async fn open() -> Fixture {
    open_with(StaticPermissions::granted()).await
}

async fn wait_for_status(controller: &PipelineController, condition: impl Fn(&PipelineStatus) -> bool) -> PipelineStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = controller.status().await;
        if condition(&status) || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_start_and_stop_recording() {
    let f = open().await;
    let dir = tempdir().unwrap();

    let path = f
        .controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap();
    assert_eq!(path.parent(), Some(dir.path()));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("video_") && name.ends_with(".mov"), "{}", name);

    let status = f.controller.status().await;
    assert_eq!(status.recording, RecordingState::Recording);
    assert!(f.driver.active_targets().contains(&TargetKind::Recorder));
    assert_eq!(f.driver.active_request().unwrap().template, RequestTemplate::Record);

    f.driver.emit_frames(3);
    assert_eq!(f.recorders.frames_recorded(), 3);

    let finished = f.controller.stop_recording().await.unwrap();
    assert_eq!(finished, path);
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("frames=3"), "{}", contents);

    let status = wait_for_status(&f.controller, |s| {
        s.state == PipelineState::SessionReady && !s.active_targets.contains(&TargetKind::Recorder)
    })
    .await;
    assert_eq!(status.recording, RecordingState::Idle);
    assert_eq!(status.active_targets, vec![TargetKind::Preview]);
    assert_eq!(f.driver.active_request().unwrap().template, RequestTemplate::Preview);

    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_mp4_container_extension() {
    let f = open().await;
    let dir = tempdir().unwrap();

    let request = VideoRecordRequest::new(dir.path().join("nested")).with_container(Container::Mp4);
    let path = f.controller.start_recording(request).await.unwrap();
    assert_eq!(path.extension().unwrap(), "mp4");
    assert!(dir.path().join("nested").is_dir());

    f.controller.stop_recording().await.unwrap();
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_second_start_is_already_recording() {
    let f = open().await;
    let dir = tempdir().unwrap();
    f.controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap();

    let err = f
        .controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::AlreadyRecording(_)));
    assert_eq!(f.recorders.created(), 1);

    f.controller.stop_recording().await.unwrap();
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_stop_without_recording() {
    let f = open().await;
    let err = f.controller.stop_recording().await.unwrap_err();
    assert!(matches!(err, CaptureError::NotRecording(_)));
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_stop_racing_unconfirmed_start() {
    let f = open().await;
    let dir = tempdir().unwrap();
    f.recorders.set_auto_confirm(false);

    let controller = f.controller.clone();
    let request = VideoRecordRequest::new(dir.path());
    let start = tokio::spawn(async move { controller.start_recording(request).await });

    let status = wait_for_status(&f.controller, |s| s.recording == RecordingState::Preparing).await;
    assert_eq!(status.recording, RecordingState::Preparing);

    let stopped = f.controller.stop_recording().await.unwrap();
    let started = start.await.unwrap();
    assert!(matches!(started, Err(CaptureError::RecordingError(_))));
    assert!(stopped.starts_with(dir.path()));

    let status = wait_for_status(&f.controller, |s| s.recording == RecordingState::Idle).await;
    assert_eq!(status.recording, RecordingState::Idle);
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_finish_failure_reported_to_stop() {
    let f = open().await;
    let dir = tempdir().unwrap();
    f.recorders.set_finish_error(Some("disk full"));

    f.controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap();
    let err = f.controller.stop_recording().await.unwrap_err();
    assert_eq!(err, CaptureError::RecordingError("disk full".to_string()));

    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_stop_detaches_recorder() {
    let f = open().await;
    let dir = tempdir().unwrap();
    let path = f
        .controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap();

    // The recorder cannot finalize a file that vanished underneath it.
    std::fs::remove_file(&path).unwrap();
    let err = f.controller.stop_recording().await.unwrap_err();
    assert!(matches!(err, CaptureError::RecordingError(_)));

    let status = wait_for_status(&f.controller, |s| {
        s.state == PipelineState::SessionReady && !s.active_targets.contains(&TargetKind::Recorder)
    })
    .await;
    assert_eq!(status.recording, RecordingState::Idle);
    assert_eq!(status.active_targets, vec![TargetKind::Preview]);
    assert_eq!(f.driver.active_targets(), vec![TargetKind::Preview]);
    assert_eq!(f.driver.active_request().unwrap().template, RequestTemplate::Preview);

    f.controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap();
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_start_failure_detaches_recorder() {
    let f = open().await;
    let dir = tempdir().unwrap();
    f.recorders.set_fail_start(true);

    let err = f
        .controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::RecordingError(_)));

    let status = wait_for_status(&f.controller, |s| !s.active_targets.contains(&TargetKind::Recorder)).await;
    assert_eq!(status.recording, RecordingState::Idle);
    assert_eq!(status.active_targets, vec![TargetKind::Preview]);

    // A later attempt can still succeed.
    f.recorders.set_fail_start(false);
    f.controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap();
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_request_rejected() {
    let f = open().await;
    let dir = tempdir().unwrap();

    let err = f
        .controller
        .start_recording(VideoRecordRequest::new(dir.path()).with_video_bitrate(0))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::InvalidArgument(_)));
    assert_eq!(f.recorders.created(), 0);
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_audio_recording_requires_microphone() {
    let f = open_with(StaticPermissions::new(PermissionStatus::Granted, PermissionStatus::Denied)).await;
    let dir = tempdir().unwrap();

    let err = f
        .controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::PermissionDenied(_)));

    // Video-only recording needs no microphone.
    f.controller
        .start_recording(VideoRecordRequest::new(dir.path()).with_audio(false))
        .await
        .unwrap();
    f.controller.stop_recording().await.unwrap();
    f.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_close_finalizes_recording() {
    let f = open().await;
    let dir = tempdir().unwrap();
    let path = f
        .controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap();
    f.driver.emit_frames(2);

    f.controller.close().await.unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("frames=2"), "{}", contents);
    assert_eq!(f.controller.status().await.recording, RecordingState::Idle);
}

#[tokio::test]
async fn test_recording_requires_open_camera() {
    let controller = PipelineController::builder(Arc::new(SimulatedDriver::with_default_cameras()))
        .recorders(Arc::new(SimulatedRecorderFactory::new()))
        .build();
    let dir = tempdir().unwrap();

    let err = controller
        .start_recording(VideoRecordRequest::new(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::InvalidState(_)));
}
