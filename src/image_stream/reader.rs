use crossbeam_channel::Sender;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::lock_unpoisoned;
use crate::pipeline::targets::{FrameSink, OutputTarget, TargetKind};
use crate::types::{CapturedFrame, PixelFormat, Size};

/// Latest-wins frame slot fed by the capture thread
///
/// At most `max_images` frames may be acquired at once; each [`AcquiredFrame`]
/// returns its slot when dropped. A frame that arrives before the previous one
/// was acquired replaces it.
pub struct FrameReader {
    size: Size,
    format: PixelFormat,
    max_images: usize,
    latest: Mutex<Option<CapturedFrame>>,
    outstanding: Arc<AtomicUsize>,
    listener: Mutex<Option<Sender<()>>>,
    replaced: AtomicU64,
}

impl FrameReader {
    pub fn new(size: Size, format: PixelFormat, max_images: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            format,
            max_images: max_images.max(1),
            latest: Mutex::new(None),
            outstanding: Arc::new(AtomicUsize::new(0)),
            listener: Mutex::new(None),
            replaced: AtomicU64::new(0),
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn target(self: &Arc<Self>) -> OutputTarget {
        OutputTarget::new(TargetKind::ImageStream, self.size, self.format, self)
    }

    /// Install or clear the frame-available wakeup
    pub fn set_listener(&self, listener: Option<Sender<()>>) {
        let clearing = listener.is_none();
        *lock_unpoisoned(&self.listener) = listener;
        if clearing {
            lock_unpoisoned(&self.latest).take();
        }
    }

    /// Take the newest frame if one is waiting and the pool has room.
    pub fn acquire_latest(&self) -> Option<AcquiredFrame> {
        if self.outstanding.load(Ordering::Acquire) >= self.max_images {
            log::debug!("Frame reader exhausted ({} images held)", self.max_images);
            return None;
        }
        let frame = lock_unpoisoned(&self.latest).take()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(AcquiredFrame {
            frame,
            outstanding: self.outstanding.clone(),
        })
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Frames overwritten before they could be acquired
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

impl FrameSink for FrameReader {
    fn on_frame(&self, frame: CapturedFrame) {
        let listener = lock_unpoisoned(&self.listener).clone();
        let Some(listener) = listener else {
            return;
        };

        if lock_unpoisoned(&self.latest).replace(frame).is_some() {
            self.replaced.fetch_add(1, Ordering::Relaxed);
        }
        // A pending wakeup already covers this frame.
        let _ = listener.try_send(());
    }
}

/// A frame checked out of a [`FrameReader`]; released on drop
pub struct AcquiredFrame {
    frame: CapturedFrame,
    outstanding: Arc<AtomicUsize>,
}

impl Deref for AcquiredFrame {
    type Target = CapturedFrame;

    fn deref(&self) -> &CapturedFrame {
        &self.frame
    }
}

impl Drop for AcquiredFrame {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
