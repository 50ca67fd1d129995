//! Preview output
//!
//! Frames from the capture thread are parked in a single latest-buffer slot and the
//! texture registry is told a new frame is ready; the renderer copies the buffer out
//! when it draws. Both sides hold the slot lock only for the copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::{CaptureError, Result};
use crate::lock_unpoisoned;
use crate::pipeline::targets::{FrameSink, OutputTarget, TargetKind};
use crate::types::{CapturedFrame, PixelFormat, Plane, Size};

pub type TextureId = i64;

/// A copied-out preview buffer
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// Something a renderer can pull pixels from
pub trait TextureSource: Send + Sync {
    fn copy_pixel_buffer(&self) -> Option<PixelBuffer>;
}

/// Host render registry
pub trait TextureRegistry: Send + Sync {
    fn register_surface_source(&self, source: Arc<dyn TextureSource>) -> Result<TextureId>;

    fn notify_frame_available(&self, texture_id: TextureId);

    fn unregister(&self, texture_id: TextureId);
}

struct PreviewShared {
    latest: Mutex<Option<PixelBuffer>>,
    registry: Arc<dyn TextureRegistry>,
    texture_id: AtomicI64,
    released: AtomicBool,
    frames: AtomicU64,
}

impl FrameSink for PreviewShared {
    fn on_frame(&self, frame: CapturedFrame) {
        if self.released.load(Ordering::Acquire) {
            return;
        }

        let buffer = PixelBuffer {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            format: frame.format,
            planes: frame.planes,
        };
        *lock_unpoisoned(&self.latest) = Some(buffer);
        self.frames.fetch_add(1, Ordering::Relaxed);

        self.registry
            .notify_frame_available(self.texture_id.load(Ordering::Acquire));
    }
}

impl TextureSource for PreviewShared {
    fn copy_pixel_buffer(&self) -> Option<PixelBuffer> {
        lock_unpoisoned(&self.latest).clone()
    }
}

/// Preview surface registered with the texture registry for one `open`
pub struct PreviewOutput {
    shared: Arc<PreviewShared>,
    target: OutputTarget,
}

impl PreviewOutput {
    pub fn new(registry: Arc<dyn TextureRegistry>, size: Size) -> Result<Self> {
        let shared = Arc::new(PreviewShared {
            latest: Mutex::new(None),
            registry: registry.clone(),
            texture_id: AtomicI64::new(-1),
            released: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        });

        let texture_id = registry
            .register_surface_source(shared.clone())
            .map_err(|e| CaptureError::ResourceUnavailable(format!("texture registry: {}", e)))?;
        shared.texture_id.store(texture_id, Ordering::Release);

        let target = OutputTarget::new(TargetKind::Preview, size, PixelFormat::Rgb8, &shared);
        log::debug!("Preview registered as texture {} at {}", texture_id, size);
        Ok(Self { shared, target })
    }

    pub fn texture_id(&self) -> TextureId {
        self.shared.texture_id.load(Ordering::Acquire)
    }

    pub fn target(&self) -> OutputTarget {
        self.target.clone()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn latest(&self) -> Option<PixelBuffer> {
        self.shared.copy_pixel_buffer()
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Stop accepting frames and unregister the texture. Safe to call twice.
    pub fn release(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.registry.unregister(self.texture_id());
        lock_unpoisoned(&self.shared.latest).take();
        log::debug!("Preview texture {} released", self.texture_id());
    }
}

impl Drop for PreviewOutput {
    fn drop(&mut self) {
        self.release();
    }
}

/// In-process registry for hosts without a renderer
///
/// Keeps sources by id and counts notifications so callers can read back frames.
#[derive(Default)]
pub struct HeadlessTextureRegistry {
    next_id: AtomicI64,
    sources: Mutex<HashMap<TextureId, Arc<dyn TextureSource>>>,
    notifications: Mutex<HashMap<TextureId, u64>>,
}

impl HeadlessTextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self, texture_id: TextureId) -> u64 {
        lock_unpoisoned(&self.notifications)
            .get(&texture_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_registered(&self, texture_id: TextureId) -> bool {
        lock_unpoisoned(&self.sources).contains_key(&texture_id)
    }

    pub fn registered_count(&self) -> usize {
        lock_unpoisoned(&self.sources).len()
    }

    /// Pull the current frame as a renderer would
    pub fn render(&self, texture_id: TextureId) -> Option<PixelBuffer> {
        let source = lock_unpoisoned(&self.sources).get(&texture_id).cloned()?;
        source.copy_pixel_buffer()
    }
}

impl TextureRegistry for HeadlessTextureRegistry {
    fn register_surface_source(&self, source: Arc<dyn TextureSource>) -> Result<TextureId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_unpoisoned(&self.sources).insert(id, source);
        Ok(id)
    }

    fn notify_frame_available(&self, texture_id: TextureId) {
        *lock_unpoisoned(&self.notifications).entry(texture_id).or_insert(0) += 1;
    }

    fn unregister(&self, texture_id: TextureId) {
        lock_unpoisoned(&self.sources).remove(&texture_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_rgb_frame;

    #[test]
    fn test_frames_notify_registry() {
        let registry = Arc::new(HeadlessTextureRegistry::new());
        let preview = PreviewOutput::new(registry.clone(), Size::new(8, 4)).unwrap();
        let id = preview.texture_id();

        let target = preview.target();
        assert!(target.deliver(synthetic_rgb_frame(1, 8, 4)));
        assert!(target.deliver(synthetic_rgb_frame(2, 8, 4)));

        assert_eq!(registry.notifications(id), 2);
        assert_eq!(preview.frames_rendered(), 2);
        assert_eq!(registry.render(id).map(|b| b.sequence), Some(2));
    }

    #[test]
    fn test_release_stops_notifications() {
        let registry = Arc::new(HeadlessTextureRegistry::new());
        let preview = PreviewOutput::new(registry.clone(), Size::new(8, 4)).unwrap();
        let id = preview.texture_id();
        let target = preview.target();

        preview.release();
        preview.release();
        target.deliver(synthetic_rgb_frame(1, 8, 4));

        assert_eq!(registry.notifications(id), 0);
        assert!(!registry.is_registered(id));
        assert!(preview.latest().is_none());
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = Arc::new(HeadlessTextureRegistry::new());
        {
            let _preview = PreviewOutput::new(registry.clone(), Size::new(8, 4)).unwrap();
            assert_eq!(registry.registered_count(), 1);
        }
        assert_eq!(registry.registered_count(), 0);
    }
}
