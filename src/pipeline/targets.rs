//! Output targets and the active target set
//!
//! A target is a non-owning handle to a frame consumer. The consumer (preview
//! output, frame reader, recorder surface) is owned by whoever created it; once it
//! is dropped the target stops accepting frames and is pruned on the next rebuild.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::types::{CapturedFrame, PixelFormat, Size};

/// Receives frames on the capture thread. Implementations must not block.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: CapturedFrame);
}

/// Role of a target in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetKind {
    Preview,
    ImageStream,
    Recorder,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Preview => write!(f, "preview"),
            TargetKind::ImageStream => write!(f, "image-stream"),
            TargetKind::Recorder => write!(f, "recorder"),
        }
    }
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Surface handed to the camera driver when a session is built
#[derive(Clone)]
pub struct OutputTarget {
    id: u64,
    kind: TargetKind,
    size: Size,
    format: PixelFormat,
    sink: Weak<dyn FrameSink>,
}

impl OutputTarget {
    pub fn new<S: FrameSink + 'static>(kind: TargetKind, size: Size, format: PixelFormat, sink: &Arc<S>) -> Self {
        let sink: Arc<dyn FrameSink> = sink.clone();
        Self::from_dyn(kind, size, format, &sink)
    }

    pub fn from_dyn(kind: TargetKind, size: Size, format: PixelFormat, sink: &Arc<dyn FrameSink>) -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            size,
            format,
            sink: Arc::downgrade(sink),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn is_alive(&self) -> bool {
        self.sink.strong_count() > 0
    }

    /// Hand a frame to the consumer. Returns false once the consumer is gone.
    pub fn deliver(&self, frame: CapturedFrame) -> bool {
        match self.sink.upgrade() {
            Some(sink) => {
                sink.on_frame(frame);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTarget")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// The set of targets the next session is built from, at most one per kind
#[derive(Debug, Default)]
pub struct ActiveTargetSet {
    targets: BTreeMap<TargetKind, OutputTarget>,
}

impl ActiveTargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the target for its kind.
    ///
    /// Returns false when that exact target is already attached.
    pub fn attach(&mut self, target: OutputTarget) -> bool {
        if let Some(existing) = self.targets.get(&target.kind) {
            if existing.id == target.id {
                return false;
            }
        }
        self.targets.insert(target.kind, target);
        true
    }

    /// Returns false when no target of that kind was attached.
    pub fn detach(&mut self, kind: TargetKind) -> bool {
        self.targets.remove(&kind).is_some()
    }

    pub fn contains(&self, kind: TargetKind) -> bool {
        self.targets.contains_key(&kind)
    }

    pub fn get(&self, kind: TargetKind) -> Option<&OutputTarget> {
        self.targets.get(&kind)
    }

    pub fn kinds(&self) -> Vec<TargetKind> {
        self.targets.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Drop targets whose consumer has gone away and return the rest.
    pub fn live_targets(&mut self) -> Vec<OutputTarget> {
        self.targets.retain(|kind, target| {
            let alive = target.is_alive();
            if !alive {
                log::debug!("Pruning {} target {}: consumer dropped", kind, target.id);
            }
            alive
        });
        self.targets.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u64>>);

    impl FrameSink for Collect {
        fn on_frame(&self, frame: CapturedFrame) {
            self.0.lock().unwrap().push(frame.sequence);
        }
    }

    fn frame(sequence: u64) -> CapturedFrame {
        CapturedFrame {
            sequence,
            timestamp_us: 0,
            width: 2,
            height: 2,
            format: PixelFormat::Rgb8,
            planes: vec![],
        }
    }

    fn target(kind: TargetKind, sink: &Arc<Collect>) -> OutputTarget {
        OutputTarget::new(kind, Size::new(2, 2), PixelFormat::Rgb8, sink)
    }

    #[test]
    fn test_attach_same_target_twice() {
        let sink = Arc::new(Collect::default());
        let preview = target(TargetKind::Preview, &sink);
        let mut set = ActiveTargetSet::new();

        assert!(set.attach(preview.clone()));
        assert!(!set.attach(preview));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_attach_replaces_same_kind() {
        let sink = Arc::new(Collect::default());
        let mut set = ActiveTargetSet::new();
        let first = target(TargetKind::ImageStream, &sink);
        let second = target(TargetKind::ImageStream, &sink);
        let second_id = second.id();

        set.attach(first);
        assert!(set.attach(second));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(TargetKind::ImageStream).map(|t| t.id()), Some(second_id));
    }

    #[test]
    fn test_detach_absent_is_noop() {
        let mut set = ActiveTargetSet::new();
        assert!(!set.detach(TargetKind::Recorder));
        assert!(set.is_empty());
    }

    #[test]
    fn test_dead_targets_are_pruned() {
        let kept = Arc::new(Collect::default());
        let dropped = Arc::new(Collect::default());
        let mut set = ActiveTargetSet::new();
        set.attach(target(TargetKind::Preview, &kept));
        set.attach(target(TargetKind::ImageStream, &dropped));
        drop(dropped);

        let live = set.live_targets();
        assert_eq!(live.len(), 1);
        assert_eq!(set.kinds(), vec![TargetKind::Preview]);
    }

    #[test]
    fn test_deliver_reaches_sink_until_dropped() {
        let sink = Arc::new(Collect::default());
        let t = target(TargetKind::Preview, &sink);

        assert!(t.deliver(frame(1)));
        assert_eq!(*sink.0.lock().unwrap(), vec![1]);

        drop(sink);
        assert!(!t.deliver(frame(2)));
    }
}
