//! MP4 file recorder: openh264 encoding muxed by muxide on a dedicated thread

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fs::File;
use std::io::BufWriter;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use muxide::api::{Metadata, MuxerBuilder, VideoCodec};

use super::config::RecorderSettings;
use super::controller::{MediaRecorder, RecorderEvent, RecorderEvents, RecorderFactory};
use super::encoder::H264Encoder;
use crate::errors::{CaptureError, Result};
use crate::lock_unpoisoned;
use crate::pipeline::targets::{FrameSink, OutputTarget, TargetKind};
use crate::types::{CapturedFrame, PixelFormat};

const FRAME_QUEUE: usize = 8;

#[derive(Debug, Default)]
pub struct Mp4RecorderFactory;

impl Mp4RecorderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl RecorderFactory for Mp4RecorderFactory {
    fn create(&self, settings: &RecorderSettings, events: RecorderEvents) -> Result<Box<dyn MediaRecorder>> {
        if settings.frame_rate == 0 {
            return Err(CaptureError::InvalidArgument("recording frame rate must be positive".to_string()));
        }
        if settings.audio_enabled {
            log::info!("MP4 recorder writes a video-only track; audio settings ignored");
        }
        Ok(Box::new(Mp4Recorder {
            settings: settings.clone(),
            events,
            surface: Arc::new(RecorderSurface::default()),
            thread: None,
        }))
    }
}

/// Frame sink the pipeline feeds; forwards to the encoding thread while recording
#[derive(Default)]
struct RecorderSurface {
    queue: Mutex<Option<Sender<CapturedFrame>>>,
}

impl FrameSink for RecorderSurface {
    fn on_frame(&self, frame: CapturedFrame) {
        let queue = lock_unpoisoned(&self.queue);
        if let Some(tx) = queue.as_ref() {
            if let Err(TrySendError::Full(frame)) = tx.try_send(frame) {
                log::debug!("Recorder queue full, dropping frame {}", frame.sequence);
            }
        }
    }
}

struct Mp4Recorder {
    settings: RecorderSettings,
    events: RecorderEvents,
    surface: Arc<RecorderSurface>,
    thread: Option<JoinHandle<()>>,
}

impl MediaRecorder for Mp4Recorder {
    fn target(&self) -> OutputTarget {
        OutputTarget::new(TargetKind::Recorder, self.settings.size, PixelFormat::Yuv420, &self.surface)
    }

    fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(CaptureError::AlreadyRecording("recorder already started".to_string()));
        }

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE);
        let settings = self.settings.clone();
        let events = self.events.clone();
        let thread = std::thread::Builder::new()
            .name("crabcapture-recorder".to_string())
            .spawn(move || {
                let outcome = write_file(&settings, rx, &events);
                events(RecorderEvent::Finished(outcome.err().map(|e| e.to_string())));
            })
            .map_err(|e| CaptureError::RecordingError(format!("Failed to spawn recorder thread: {}", e)))?;

        *lock_unpoisoned(&self.surface.queue) = Some(tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // Dropping the sender lets the writer drain and finalize the file.
        lock_unpoisoned(&self.surface.queue).take();
        Ok(())
    }

    fn release(&mut self) {
        lock_unpoisoned(&self.surface.queue).take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Recorder thread panicked");
            }
        }
    }
}

fn write_file(settings: &RecorderSettings, frames: Receiver<CapturedFrame>, events: &RecorderEvents) -> Result<()> {
    let file = File::create(&settings.output_path)
        .map_err(|e| CaptureError::IoError(format!("Failed to create {:?}: {}", settings.output_path, e)))?;
    let fps = settings.frame_rate as f64;

    let mut encoder = H264Encoder::new(settings.size)?;
    let mut muxer = MuxerBuilder::new(BufWriter::new(file))
        .video(VideoCodec::H264, settings.size.width, settings.size.height, fps)
        .with_fast_start(true)
        .with_metadata(Metadata::new().with_current_time())
        .build()
        .map_err(|e| CaptureError::RecordingError(format!("Failed to create muxer: {}", e)))?;

    log::info!(
        "Recording {} @ {} fps to {:?} (orientation hint {})",
        settings.size,
        settings.frame_rate,
        settings.output_path,
        settings.orientation_hint
    );
    events(RecorderEvent::Started);

    let mut written: u64 = 0;
    for frame in frames.iter() {
        let encoded = match encoder.encode(&frame) {
            Ok(encoded) if !encoded.data.is_empty() => encoded,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("Skipping frame {}: {}", frame.sequence, e);
                continue;
            }
        };
        let pts = written as f64 / fps;
        muxer
            .write_video(pts, &encoded.data, encoded.is_keyframe)
            .map_err(|e| CaptureError::RecordingError(format!("Failed to write frame: {}", e)))?;
        written += 1;
    }

    let stats = muxer
        .finish_with_stats()
        .map_err(|e| CaptureError::RecordingError(format!("Failed to finalize recording: {}", e)))?;
    log::info!(
        "Recording finalized: {} video frames, {:.2}s, {} bytes",
        stats.video_frames,
        stats.duration_secs,
        stats.bytes_written
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::config::{unique_output_path, Container, VideoRecordRequest};
    use crate::testing::{synthetic_yuv_frame, wait_until};
    use crate::types::Size;
    use std::time::Duration;

    #[test]
    fn test_records_frames_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = unique_output_path(dir.path(), Container::Mp4).unwrap();
        let settings = RecorderSettings::new(
            &VideoRecordRequest::new(dir.path()).with_audio(false),
            path.clone(),
            Size::new(64, 48),
            30,
            0,
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let events: RecorderEvents = Arc::new(move |e| log.lock().unwrap().push(e));

        let mut recorder = Mp4RecorderFactory::new().create(&settings, events).unwrap();
        let target = recorder.target();
        recorder.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || seen.lock().unwrap().contains(&RecorderEvent::Started)));

        for i in 0..10 {
            target.deliver(synthetic_yuv_frame(i, 64, 48));
            std::thread::sleep(Duration::from_millis(5));
        }
        recorder.stop().unwrap();
        assert!(wait_until(Duration::from_secs(5), || seen
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, RecorderEvent::Finished(_)))));
        recorder.release();

        assert!(seen.lock().unwrap().contains(&RecorderEvent::Finished(None)));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
