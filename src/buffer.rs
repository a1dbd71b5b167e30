// Ordered buffer of received metadata frames keyed by media timestamp.
// Frames at or before the applied watermark are refused so the display never moves backward.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::types::{MetadataFrame, Timestamp};

/// What happened to a frame offered to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A frame with the same timestamp was already buffered and has been replaced.
    Replaced,
    /// The frame is not newer than the applied frame and was discarded.
    Stale,
}

/// Frame buffer for one video element.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: BTreeMap<Timestamp, MetadataFrame>,
    watermark: Option<Timestamp>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        FrameBuffer {
            frames: BTreeMap::new(),
            watermark: None,
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, frame: MetadataFrame) -> InsertOutcome {
        if let Some(watermark) = self.watermark {
            if frame.timestamp <= watermark {
                return InsertOutcome::Stale;
            }
        }

        let outcome = match self.frames.insert(frame.timestamp, frame) {
            Some(_) => InsertOutcome::Replaced,
            None => InsertOutcome::Inserted,
        };

        while self.frames.len() > self.capacity {
            if let Some((ts, _)) = self.frames.pop_first() {
                tracing::debug!(timestamp_us = ts.as_micros(), "buffer full, dropping oldest frame");
            }
        }

        outcome
    }

    /// Latest frame with `playback - tolerance <= ts <= playback`, never older than the watermark.
    pub fn select(&self, playback: Timestamp, tolerance_ms: f64) -> Option<&MetadataFrame> {
        let mut lower = playback.saturating_sub_millis(tolerance_ms);
        if let Some(watermark) = self.watermark {
            lower = lower.max(watermark);
        }
        if lower > playback {
            return None;
        }
        self.frames
            .range(lower..=playback)
            .next_back()
            .map(|(_, frame)| frame)
    }

    /// Record that the frame at `ts` is on screen. The watermark only moves forward.
    pub fn mark_applied(&mut self, ts: Timestamp) {
        self.watermark = Some(self.watermark.map_or(ts, |w| w.max(ts)));
    }

    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    /// Drop frames older than `cutoff`. Returns how many were removed.
    pub fn evict_before(&mut self, cutoff: Timestamp) -> usize {
        let kept = self.frames.split_off(&cutoff);
        let evicted = self.frames.len();
        self.frames = kept;
        evicted
    }

    /// Number of buffered frames strictly newer than `ts` (all frames when `None`).
    pub fn pending_after(&self, ts: Option<Timestamp>) -> usize {
        match ts {
            Some(ts) => self
                .frames
                .range((Bound::Excluded(ts), Bound::Unbounded))
                .count(),
            None => self.frames.len(),
        }
    }

    pub fn newest(&self) -> Option<&MetadataFrame> {
        self.frames.last_key_value().map(|(_, frame)| frame)
    }

    pub fn oldest(&self) -> Option<&MetadataFrame> {
        self.frames.first_key_value().map(|(_, frame)| frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Forget all frames and the watermark (seek, element replacement, teardown).
    pub fn clear(&mut self) {
        self.frames.clear();
        self.reset_watermark();
    }

    /// Forget what has been applied; buffered frames stay.
    pub fn reset_watermark(&mut self) {
        self.watermark = None;
    }
}
