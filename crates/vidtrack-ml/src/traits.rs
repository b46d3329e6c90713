//! Detection engine traits

use crate::error::EngineError;
use vidtrack_types::{Detection, EngineKind};
use std::path::Path;

/// Video properties reported by an engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub total_frames: u64,
    pub fps: f64,
}

/// Inclusive, 1-based frame range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: u64,
    pub end: u64,
}

impl FrameRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, frame: u64) -> bool {
        frame >= self.start && frame <= self.end
    }

    /// Split `1..=total` into at most `parts` contiguous, non-empty ranges
    pub fn split(total: u64, parts: usize) -> Vec<FrameRange> {
        if total == 0 {
            return Vec::new();
        }
        let parts = (parts.max(1) as u64).min(total);
        let base = total / parts;
        let remainder = total % parts;

        let mut ranges = Vec::with_capacity(parts as usize);
        let mut start = 1;
        for i in 0..parts {
            let len = base + u64::from(i < remainder);
            ranges.push(FrameRange::new(start, start + len - 1));
            start += len;
        }
        ranges
    }
}

/// What an engine produced for one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Detections(Vec<Detection>),
    /// Frame could not be read; the tracker sees an empty detection set
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetections {
    pub frame: u64,
    pub outcome: FrameOutcome,
}

/// Trait for detection engines.
///
/// Conceptually `detect(frame) -> [Detection]`; engines are driven over a
/// frame range because each one runs as its own process and decodes the video
/// itself. Results for a range are delivered through `sink` in the order the
/// engine produces them, which is not guaranteed to be frame order.
pub trait DetectionEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Engine name
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Read total frame count and frame rate of a video
    fn probe(&self, video: &Path) -> Result<VideoProbe, EngineError>;

    /// Detect objects in every frame of `range`
    fn detect_range(
        &self,
        video: &Path,
        range: FrameRange,
        sink: &mut dyn FnMut(FrameDetections),
    ) -> Result<(), EngineError>;
}
