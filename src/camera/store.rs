//! Per-eye frame history

use tracing::{trace, warn};

use super::source::FrameSource;
use crate::buffer::RingBuffer;
use crate::types::{Eye, FrameInfo};
use crate::Result;

/// Default number of frames kept per eye.
pub const DEFAULT_CAPACITY: usize = 30;

/// One ring buffer of frames per tracked eye.
pub struct FrameStore {
    eyes: [RingBuffer<FrameInfo>; 2],
}

impl FrameStore {
    /// Create a store whose slots are pre-allocated for `width x height` images.
    pub fn new(capacity: usize, width: u32, height: u32) -> Result<Self> {
        let left = RingBuffer::new(capacity, || FrameInfo::placeholder(width, height))?;
        let right = RingBuffer::new(capacity, || FrameInfo::placeholder(width, height))?;
        Ok(Self { eyes: [left, right] })
    }

    fn buffer(&self, eye: Eye) -> &RingBuffer<FrameInfo> {
        &self.eyes[eye.index()]
    }

    /// Capture one frame for `eye` into the next recycled slot.
    ///
    /// Capture failures leave an invalid slot behind instead of an error.
    /// Returns whether the capture succeeded.
    pub fn grab(&self, eye: Eye, source: &mut dyn FrameSource) -> bool {
        self.buffer(eye).put(|slot| match source.capture(eye, slot) {
            Ok(()) => {
                trace!(?eye, timestamp = slot.timestamp_ms, "frame grabbed");
                true
            }
            Err(e) => {
                warn!(?eye, "frame capture failed: {}", e);
                slot.invalidate();
                false
            }
        })
    }

    /// Copy the newest valid frame within `tolerance` ms of `timestamp` into `scratch`.
    ///
    /// A frame matches when `|frame.timestamp - timestamp| < tolerance`.
    pub fn closest_to(
        &self,
        eye: Eye,
        timestamp: i64,
        tolerance: i64,
        scratch: &mut FrameInfo,
    ) -> bool {
        self.buffer(eye).scan_newest_to_oldest(
            |frame| frame.is_valid() && (frame.timestamp_ms - timestamp).abs() < tolerance,
            |frame| scratch.copy_from(frame),
        )
    }

    /// Copy the most recent frame for `eye` into `scratch`.
    pub fn newest(&self, eye: Eye, scratch: &mut FrameInfo) -> bool {
        self.buffer(eye).with_head(|frame| scratch.copy_from(frame)).is_some()
    }

    /// Number of frames held for `eye`.
    pub fn len(&self, eye: Eye) -> usize {
        self.buffer(eye).len()
    }

    /// Per-eye capacity.
    pub fn capacity(&self) -> usize {
        self.eyes[0].capacity()
    }
}
