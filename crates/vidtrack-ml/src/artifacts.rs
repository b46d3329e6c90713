//! Per-video analysis artifacts
//!
//! Scene segmentation and audio diarization are produced by earlier pipeline
//! steps and loaded once per job. Both are read-only lookups by frame number.

use anyhow::{Context, Result};
use vidtrack_types::{AudioArtifact, AudioFrameEntry, AudioFrameInfo, SegmentArtifact, SegmentInfo};
use std::collections::HashMap;
use std::path::Path;

/// Relative position of `frame` inside a segment, clamped to 0.0..=1.0.
///
/// Zero-length and inverted segments report 0.0.
pub fn segment_position(segment: &SegmentInfo, frame: u64) -> f64 {
    if segment.frame_end <= segment.frame_start {
        return 0.0;
    }
    let span = (segment.frame_end - segment.frame_start) as f64;
    let offset = frame.saturating_sub(segment.frame_start) as f64;
    (offset / span).clamp(0.0, 1.0)
}

/// Scene boundaries of one video
#[derive(Debug, Clone, Default)]
pub struct SegmentTimeline {
    segments: Vec<SegmentInfo>,
}

impl SegmentTimeline {
    pub fn new(mut segments: Vec<SegmentInfo>) -> Self {
        segments.sort_by_key(|s| (s.frame_start, s.id));
        Self { segments }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene artifact {}", path.display()))?;
        let artifact: SegmentArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid scene artifact {}", path.display()))?;

        tracing::info!(
            "SegmentTimeline: loaded {} segments from {}",
            artifact.segments.len(),
            path.display()
        );
        Ok(Self::new(artifact.segments))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment containing `frame`; the first by start frame wins on overlap
    pub fn segment_at(&self, frame: u64) -> Option<&SegmentInfo> {
        self.segments.iter().find(|s| {
            if s.frame_end < s.frame_start {
                frame == s.frame_start
            } else {
                frame >= s.frame_start && frame <= s.frame_end
            }
        })
    }

    /// `(segment id, position)` for `frame`
    pub fn position(&self, frame: u64) -> Option<(i64, f64)> {
        self.segment_at(frame)
            .map(|segment| (segment.id, segment_position(segment, frame)))
    }
}

/// Diarization snapshots indexed by frame number
#[derive(Debug, Clone, Default)]
pub struct AudioTimeline {
    frames: HashMap<u64, AudioFrameInfo>,
}

impl AudioTimeline {
    pub fn new(entries: Vec<AudioFrameEntry>) -> Self {
        let frames = entries
            .into_iter()
            .map(|entry| (entry.frame, entry.info))
            .collect();
        Self { frames }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read audio artifact {}", path.display()))?;
        let artifact: AudioArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid audio artifact {}", path.display()))?;

        let timeline = Self::new(artifact.frames);
        let speech_frames = timeline
            .frames
            .values()
            .filter(|info| info.is_speech_present)
            .count();
        tracing::info!(
            "AudioTimeline: loaded {} frames ({} with speech) from {}",
            timeline.frames.len(),
            speech_frames,
            path.display()
        );
        Ok(timeline)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn at(&self, frame: u64) -> Option<&AudioFrameInfo> {
        self.frames.get(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seg(id: i64, start: u64, end: u64) -> SegmentInfo {
        SegmentInfo {
            id,
            frame_start: start,
            frame_end: end,
        }
    }

    #[test]
    fn test_segment_position() {
        assert_eq!(segment_position(&seg(0, 10, 20), 15), 0.5);
        assert_eq!(segment_position(&seg(0, 10, 20), 25), 1.0);
        assert_eq!(segment_position(&seg(0, 10, 20), 5), 0.0);
        assert_eq!(segment_position(&seg(0, 10, 10), 10), 0.0);
        assert_eq!(segment_position(&seg(0, 30, 10), 20), 0.0);
    }

    #[test]
    fn test_segment_lookup() {
        let timeline = SegmentTimeline::new(vec![seg(2, 51, 100), seg(1, 1, 50)]);
        assert_eq!(timeline.segment_at(50).unwrap().id, 1);
        assert_eq!(timeline.position(51), Some((2, 0.0)));
        assert!(timeline.segment_at(101).is_none());
    }

    #[test]
    fn test_load_audio_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"frames":[{{"frame":1,"isSpeechPresent":true,"numSpeakers":2,"activeSpeakerLabels":["SPEAKER_00","SPEAKER_01"],"timecodeSec":0.04}},{{"frame":2}}]}}"#
        )
        .unwrap();

        let timeline = AudioTimeline::load(file.path()).unwrap();
        assert_eq!(timeline.len(), 2);
        let first = timeline.at(1).unwrap();
        assert!(first.is_speech_present);
        assert_eq!(first.num_speakers, 2);
        assert!(!timeline.at(2).unwrap().is_speech_present);
        assert!(timeline.at(3).is_none());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(SegmentTimeline::load(file.path()).is_err());
    }
}
