use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::convert::to_image_frame;
use super::reader::FrameReader;
use super::{ImageFrameSink, ImageStreamState};
use crate::errors::{CaptureError, Result};
use crate::orientation::RotationCell;
use crate::pipeline::targets::OutputTarget;
use crate::types::{ImageStreamRequest, PixelFormat, Size, TransportFormat};

/// Forwards a frame when the incremented counter is a multiple of the interval,
/// so an interval of 3 forwards frames 3, 6, 9 and so on.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: u32,
    counter: u64,
}

impl FrameThrottle {
    pub fn new(interval: u32) -> Result<Self> {
        if interval == 0 {
            return Err(CaptureError::InvalidArgument(
                "frame skip interval must be at least 1".to_string(),
            ));
        }
        Ok(Self { interval, counter: 0 })
    }

    pub fn should_forward(&mut self) -> bool {
        self.counter += 1;
        self.counter % self.interval as u64 == 0
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

struct Delivery {
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Image stream for one `open`: owns the reader and the delivery thread
pub struct ImageStreamMultiplexer {
    reader: Option<Arc<FrameReader>>,
    rotation: RotationCell,
    frame_counter: Arc<AtomicU64>,
    delivery: Option<Delivery>,
}

impl ImageStreamMultiplexer {
    pub fn new(size: Size, format: PixelFormat, max_images: usize, rotation: RotationCell) -> Self {
        Self {
            reader: Some(FrameReader::new(size, format, max_images)),
            rotation,
            frame_counter: Arc::new(AtomicU64::new(0)),
            delivery: None,
        }
    }

    pub fn state(&self) -> ImageStreamState {
        match (&self.reader, &self.delivery) {
            (None, _) => ImageStreamState::Uninitialized,
            (Some(_), None) => ImageStreamState::Inactive,
            (Some(_), Some(_)) => ImageStreamState::Active,
        }
    }

    /// Frames acquired since the last start
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter.load(Ordering::Acquire)
    }

    pub fn target(&self) -> Result<OutputTarget> {
        self.reader
            .as_ref()
            .map(|reader| reader.target())
            .ok_or_else(|| CaptureError::ResourceUnavailable("image reader not initialized".to_string()))
    }

    pub fn start(&mut self, request: ImageStreamRequest, sink: Arc<dyn ImageFrameSink>) -> Result<()> {
        let reader = self
            .reader
            .clone()
            .ok_or_else(|| CaptureError::ResourceUnavailable("image reader not initialized".to_string()))?;
        if self.delivery.is_some() {
            return Err(CaptureError::AlreadyStreaming(
                "image streaming is already started".to_string(),
            ));
        }
        let throttle = FrameThrottle::new(request.frame_skip_interval)?;

        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let active = Arc::new(AtomicBool::new(true));
        self.frame_counter.store(0, Ordering::Release);

        let worker = DeliveryWorker {
            reader: reader.clone(),
            wake: wake_rx,
            active: active.clone(),
            throttle,
            transport: request.transport,
            rotation: self.rotation.clone(),
            frame_counter: self.frame_counter.clone(),
            sink,
        };
        let thread = std::thread::Builder::new()
            .name("crabcapture-image-stream".to_string())
            .spawn(move || worker.run())
            .map_err(|e| CaptureError::ResourceUnavailable(format!("Failed to spawn delivery thread: {}", e)))?;

        reader.set_listener(Some(wake_tx));
        self.delivery = Some(Delivery {
            active,
            thread: Some(thread),
        });
        log::info!(
            "Image stream started (every {} frame(s), {:?})",
            request.frame_skip_interval,
            request.transport
        );
        Ok(())
    }

    /// Remove the frame callback. Does nothing when inactive.
    pub fn stop(&mut self) {
        let Some(mut delivery) = self.delivery.take() else {
            return;
        };

        delivery.active.store(false, Ordering::SeqCst);
        if let Some(reader) = &self.reader {
            // Dropping the last sender ends the delivery loop.
            reader.set_listener(None);
        }
        if let Some(thread) = delivery.thread.take() {
            if thread.join().is_err() {
                log::error!("Image stream delivery thread panicked");
            }
        }
        log::info!("Image stream stopped after {} frames", self.frame_counter());
    }

    /// Stop and release the reader. The stream cannot be restarted afterwards.
    pub fn deinitialize(&mut self) {
        self.stop();
        self.reader = None;
    }
}

impl Drop for ImageStreamMultiplexer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DeliveryWorker {
    reader: Arc<FrameReader>,
    wake: Receiver<()>,
    active: Arc<AtomicBool>,
    throttle: FrameThrottle,
    transport: TransportFormat,
    rotation: RotationCell,
    frame_counter: Arc<AtomicU64>,
    sink: Arc<dyn ImageFrameSink>,
}

impl DeliveryWorker {
    fn run(mut self) {
        for _ in self.wake.iter() {
            if !self.active.load(Ordering::SeqCst) {
                break;
            }
            let Some(frame) = self.reader.acquire_latest() else {
                continue;
            };

            let forward = self.throttle.should_forward();
            self.frame_counter.store(self.throttle.counter(), Ordering::Release);
            if !forward {
                continue;
            }

            match to_image_frame(&frame, self.rotation.get(), self.transport) {
                Ok(image) => {
                    drop(frame);
                    if self.active.load(Ordering::SeqCst) {
                        self.sink.on_image_frame(image);
                    }
                }
                Err(e) => log::warn!("Dropping frame {}: {}", frame.sequence, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_stream::ImageFrame;
    use crate::testing::{image_channel, synthetic_yuv_frame, wait_until};
    use crate::pipeline::targets::FrameSink;
    use std::time::Duration;

    #[test]
    fn test_throttle_modulo() {
        let mut throttle = FrameThrottle::new(3).unwrap();
        let forwarded: Vec<u64> = (1..=9)
            .filter(|_| throttle.should_forward())
            .collect();
        assert_eq!(forwarded, vec![3, 6, 9]);
    }

    #[test]
    fn test_throttle_interval_one_forwards_all() {
        let mut throttle = FrameThrottle::new(1).unwrap();
        assert!((0..5).all(|_| throttle.should_forward()));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(FrameThrottle::new(0), Err(CaptureError::InvalidArgument(_))));
    }

    #[test]
    fn test_start_requires_reader() {
        let mut mux = ImageStreamMultiplexer::new(Size::new(4, 4), PixelFormat::Rgb8, 2, RotationCell::default());
        mux.deinitialize();
        assert_eq!(mux.state(), ImageStreamState::Uninitialized);

        let err = mux
            .start(ImageStreamRequest::new(1), Arc::new(|_f: ImageFrame| {}))
            .unwrap_err();
        assert!(matches!(err, CaptureError::ResourceUnavailable(_)));
        assert!(mux.target().is_err());
    }

    #[test]
    fn test_double_start_and_idempotent_stop() {
        let mut mux = ImageStreamMultiplexer::new(Size::new(4, 4), PixelFormat::Rgb8, 2, RotationCell::default());
        let sink: Arc<dyn ImageFrameSink> = Arc::new(|_f: ImageFrame| {});

        mux.start(ImageStreamRequest::new(2), sink.clone()).unwrap();
        assert!(matches!(
            mux.start(ImageStreamRequest::new(2), sink),
            Err(CaptureError::AlreadyStreaming(_))
        ));
        mux.stop();
        mux.stop();
        assert_eq!(mux.state(), ImageStreamState::Inactive);
    }

    #[test]
    fn test_conversion_error_releases_frame_and_continues() {
        // A single-slot pool stalls the stream if a failed frame is never released.
        let mut mux = ImageStreamMultiplexer::new(Size::new(8, 4), PixelFormat::Yuv420, 1, RotationCell::default());
        let reader = mux.reader.clone().unwrap();
        let (sink, frames) = image_channel();
        mux.start(ImageStreamRequest::new(1), sink).unwrap();

        let mut malformed = synthetic_yuv_frame(1, 8, 4);
        malformed.planes.pop();
        reader.on_frame(malformed);
        assert!(wait_until(Duration::from_secs(2), || {
            mux.frame_counter() == 1 && reader.outstanding() == 0
        }));
        assert!(frames.try_recv().is_err());

        reader.on_frame(synthetic_yuv_frame(2, 8, 4));
        let frame = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(mux.frame_counter(), 2);
        assert_eq!(reader.outstanding(), 0);

        mux.stop();
        assert_eq!(mux.state(), ImageStreamState::Inactive);
    }
}
