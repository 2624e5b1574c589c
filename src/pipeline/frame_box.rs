//! Single-slot latest-frame holder shared by the producer and every viewer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use crate::Frame;

/// Lossy latest-value cell.
///
/// `publish` swaps in a freshly allocated `Arc<Frame>`; readers get a clone of
/// that `Arc`. Frames are never mutated in place, so a reader always sees a
/// whole frame. There is no queue: slow readers simply skip frames.
#[derive(Default)]
pub struct FrameBox {
    slot: ArcSwapOption<Frame>,
    published: CachePadded<AtomicU64>,
}

impl FrameBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer: replace the current frame. Never waits on readers.
    pub fn publish(&self, frame: Frame) {
        self.slot.store(Some(Arc::new(frame)));
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_published").increment(1);
    }

    /// Consumer: the most recent frame, or `None` before the first publish
    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.slot.load_full()
    }

    /// Sequence number of the current frame
    pub fn sequence(&self) -> Option<u64> {
        self.slot.load().as_ref().map(|frame| frame.meta.sequence)
    }

    /// Total number of publishes so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
