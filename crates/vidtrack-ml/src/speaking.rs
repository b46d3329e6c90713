//! Speaking fusion classifier
//!
//! Decides per tracked face and frame whether that face is speaking, from two
//! evidence sources:
//! - audio: diarization says speech is present at this frame
//!   (`min(0.8 + 0.1 * speakers, 1.0)`), weighted by `audio_weight`;
//! - visual: the jaw-open blendshape scaled by `jaw_open_threshold` and
//!   boosted by the average auxiliary mouth shapes, weighted by `visual_weight`.
//!
//! Scene position is reported as evidence only and never changes the decision.

use crate::artifacts::{AudioTimeline, SegmentTimeline};
use crate::engines::EngineCapabilities;
use vidtrack_types::{
    AudioFrameInfo, Detection, EngineKind, SpeakingConfig, SpeakingEvidence, SpeakingMethod,
    SpeakingResult, JAW_OPEN, MOUTH_AUX_BLENDSHAPES,
};
use std::collections::BTreeMap;

/// Audio evidence confidence for one frame
pub fn audio_confidence(info: Option<&AudioFrameInfo>) -> f64 {
    match info {
        Some(info) if info.is_speech_present => {
            (0.8 + 0.1 * f64::from(info.num_speakers)).min(1.0)
        }
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct VisualSignal {
    confidence: f64,
    jaw_open: f64,
    mouth_aux: Option<f64>,
}

fn visual_signal(
    blendshapes: Option<&BTreeMap<String, f64>>,
    jaw_open_threshold: f64,
) -> Option<VisualSignal> {
    let shapes = blendshapes?;
    let jaw_open = *shapes.get(JAW_OPEN)?;

    let aux: Vec<f64> = MOUTH_AUX_BLENDSHAPES
        .iter()
        .filter_map(|name| shapes.get(*name).copied())
        .filter(|v| v.is_finite())
        .collect();
    let mouth_aux = if aux.is_empty() {
        None
    } else {
        Some(aux.iter().sum::<f64>() / aux.len() as f64)
    };

    let jaw_score = if jaw_open_threshold > 0.0 {
        jaw_open / jaw_open_threshold
    } else {
        jaw_open
    };
    let boosted = jaw_score * (1.0 + mouth_aux.unwrap_or(0.0).max(0.0));
    let confidence = if boosted.is_finite() {
        boosted.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(VisualSignal {
        confidence,
        jaw_open,
        mouth_aux,
    })
}

/// Audio/visual fusion classifier for one job
#[derive(Debug, Clone)]
pub struct SpeakingClassifier {
    config: SpeakingConfig,
    audio: Option<AudioTimeline>,
    segments: Option<SegmentTimeline>,
}

impl SpeakingClassifier {
    pub fn new(config: SpeakingConfig) -> Self {
        Self {
            config,
            audio: None,
            segments: None,
        }
    }

    pub fn with_audio(mut self, audio: AudioTimeline) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_segments(mut self, segments: SegmentTimeline) -> Self {
        self.segments = Some(segments);
        self
    }

    pub fn config(&self) -> &SpeakingConfig {
        &self.config
    }

    pub fn classify(
        &self,
        frame: u64,
        blendshapes: Option<&BTreeMap<String, f64>>,
        engine: EngineKind,
    ) -> SpeakingResult {
        let audio_info = self.audio.as_ref().and_then(|audio| audio.at(frame));
        let audio_conf = audio_confidence(audio_info);

        let visual = if engine.is_face_engine() {
            visual_signal(blendshapes, self.config.jaw_open_threshold)
        } else {
            None
        };
        let visual_conf = visual.map(|v| v.confidence).unwrap_or(0.0);

        let audio_term = audio_conf * self.config.audio_weight;
        let visual_term = visual_conf * self.config.visual_weight;
        let confidence = (audio_term + visual_term).clamp(0.0, 1.0);

        let method = match visual {
            None if audio_term > 0.0 => SpeakingMethod::ObjectDetectionFallback,
            None => SpeakingMethod::NoDetection,
            Some(_) if audio_term > 0.0 && audio_term >= visual_term => {
                SpeakingMethod::AudioDominant
            }
            Some(_) if visual_term > 0.0 => SpeakingMethod::VisualDominant,
            Some(_) => SpeakingMethod::NoDetection,
        };

        let (segment_id, segment_position) = match self
            .segments
            .as_ref()
            .and_then(|segments| segments.position(frame))
        {
            Some((id, position)) => (Some(id), Some(position)),
            None => (None, None),
        };

        SpeakingResult {
            is_speaking: confidence > self.config.min_confidence_threshold,
            confidence,
            method,
            evidence: SpeakingEvidence {
                audio_confidence: audio_conf,
                visual_confidence: visual_conf,
                jaw_open: visual.map(|v| v.jaw_open),
                mouth_aux: visual.and_then(|v| v.mouth_aux),
                num_speakers: audio_info.map(|info| info.num_speakers).unwrap_or(0),
                active_speakers: audio_info
                    .map(|info| info.active_speaker_labels.clone())
                    .unwrap_or_default(),
                segment_id,
                segment_position,
            },
        }
    }
}

/// Visual-only jaw-threshold heuristic, used when fusion is disabled.
///
/// Returns `None` for detections that do not come from a face engine.
pub fn jaw_heuristic(detection: &Detection, config: &SpeakingConfig) -> Option<SpeakingResult> {
    if !detection.source.is_face_engine() {
        return None;
    }

    let result = match detection.jaw_open() {
        Some(jaw_open) => SpeakingResult {
            is_speaking: jaw_open > config.jaw_open_threshold,
            confidence: if jaw_open.is_finite() {
                jaw_open.clamp(0.0, 1.0)
            } else {
                0.0
            },
            method: SpeakingMethod::VisualHeuristic,
            evidence: SpeakingEvidence {
                jaw_open: Some(jaw_open),
                ..Default::default()
            },
        },
        None => SpeakingResult {
            is_speaking: false,
            confidence: 0.0,
            method: SpeakingMethod::NoDetection,
            evidence: SpeakingEvidence::default(),
        },
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidtrack_types::{AudioFrameEntry, BBox, SegmentInfo};

    fn shapes(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn speech(frame: u64, speakers: u32) -> AudioFrameEntry {
        AudioFrameEntry {
            frame,
            info: AudioFrameInfo {
                is_speech_present: true,
                num_speakers: speakers,
                active_speaker_labels: (0..speakers).map(|i| format!("SPEAKER_{:02}", i)).collect(),
                timecode_sec: frame as f64 / 25.0,
            },
        }
    }

    #[test]
    fn test_audio_confidence() {
        assert_eq!(audio_confidence(None), 0.0);
        let silent = AudioFrameInfo::default();
        assert_eq!(audio_confidence(Some(&silent)), 0.0);
        let one = speech(1, 1).info;
        assert!((audio_confidence(Some(&one)) - 0.9).abs() < 1e-9);
        let many = speech(1, 4).info;
        assert_eq!(audio_confidence(Some(&many)), 1.0);
    }

    #[test]
    fn test_audio_and_jaw_fuse_to_speaking() {
        let classifier = SpeakingClassifier::new(SpeakingConfig::default())
            .with_audio(AudioTimeline::new(vec![speech(10, 1)]));
        let blend = shapes(&[(JAW_OPEN, 0.5)]);

        let result = classifier.classify(10, Some(&blend), EngineKind::FaceLandmarker);

        let expected = 0.9 * 0.6 + 1.0 * 0.4;
        assert!(result.is_speaking);
        assert_eq!(result.method, SpeakingMethod::AudioDominant);
        assert!((result.confidence - expected).abs() < 1e-9);
        assert!((result.evidence.audio_confidence - 0.9).abs() < 1e-9);
        assert_eq!(result.evidence.visual_confidence, 1.0);
        assert_eq!(result.evidence.active_speakers, vec!["SPEAKER_00".to_string()]);
    }

    #[test]
    fn test_visual_only_and_aux_boost() {
        let classifier = SpeakingClassifier::new(SpeakingConfig::default());
        let plain = shapes(&[(JAW_OPEN, 0.15)]);
        let boosted = shapes(&[(JAW_OPEN, 0.15), ("mouthFunnel", 0.5), ("mouthPucker", 0.5)]);

        let a = classifier.classify(1, Some(&plain), EngineKind::FaceLandmarker);
        let b = classifier.classify(1, Some(&boosted), EngineKind::FaceLandmarker);

        assert_eq!(a.method, SpeakingMethod::VisualDominant);
        assert!((a.confidence - 0.2).abs() < 1e-9);
        assert!(!a.is_speaking);
        assert!((b.confidence - 0.3).abs() < 1e-9);
        assert_eq!(b.evidence.mouth_aux, Some(0.5));
    }

    #[test]
    fn test_method_without_face_signal() {
        let classifier = SpeakingClassifier::new(SpeakingConfig::default())
            .with_audio(AudioTimeline::new(vec![speech(3, 2)]));

        let with_audio = classifier.classify(3, None, EngineKind::ObjectYolo);
        assert_eq!(with_audio.method, SpeakingMethod::ObjectDetectionFallback);
        assert!(with_audio.is_speaking);

        let silent = classifier.classify(4, None, EngineKind::ObjectYolo);
        assert_eq!(silent.method, SpeakingMethod::NoDetection);
        assert!(!silent.is_speaking);
        assert_eq!(silent.confidence, 0.0);
    }

    #[test]
    fn test_method_resolution_with_visual_weighted_config() {
        let config = SpeakingConfig {
            audio_weight: 0.2,
            visual_weight: 0.8,
            ..SpeakingConfig::default()
        };
        let classifier =
            SpeakingClassifier::new(config).with_audio(AudioTimeline::new(vec![speech(5, 1)]));
        let blend = shapes(&[(JAW_OPEN, 0.5)]);

        let both = classifier.classify(5, Some(&blend), EngineKind::FaceLandmarker);
        assert_eq!(both.method, SpeakingMethod::VisualDominant);
        assert!((both.confidence - (0.9 * 0.2 + 1.0 * 0.8)).abs() < 1e-9);
        assert!(both.is_speaking);

        // Face engine without blendshapes has no face signal, so audio alone
        // resolves to the fallback tag regardless of weights
        let no_face = classifier.classify(5, None, EngineKind::FaceLandmarker);
        assert_eq!(no_face.method, SpeakingMethod::ObjectDetectionFallback);
        assert!((no_face.confidence - 0.9 * 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_segment_context_does_not_change_decision() {
        let blend = shapes(&[(JAW_OPEN, 0.6)]);
        let plain = SpeakingClassifier::new(SpeakingConfig::default());
        let with_scenes = plain.clone().with_segments(SegmentTimeline::new(vec![
            SegmentInfo {
                id: 7,
                frame_start: 1,
                frame_end: 21,
            },
            SegmentInfo {
                id: 8,
                frame_start: 30,
                frame_end: 30,
            },
        ]));

        let a = plain.classify(11, Some(&blend), EngineKind::FaceLandmarker);
        let b = with_scenes.classify(11, Some(&blend), EngineKind::FaceLandmarker);
        assert_eq!(a.is_speaking, b.is_speaking);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(b.evidence.segment_id, Some(7));
        assert_eq!(b.evidence.segment_position, Some(0.5));

        let zero = with_scenes.classify(30, Some(&blend), EngineKind::FaceLandmarker);
        assert_eq!(zero.evidence.segment_position, Some(0.0));
    }

    #[test]
    fn test_jaw_heuristic() {
        let config = SpeakingConfig::default();
        let face = Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), EngineKind::FaceLandmarker, "face")
            .with_blendshapes(shapes(&[(JAW_OPEN, 0.45)]));
        let result = jaw_heuristic(&face, &config).unwrap();
        assert!(result.is_speaking);
        assert_eq!(result.method, SpeakingMethod::VisualHeuristic);

        let bare_face = Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), EngineKind::Yunet, "face");
        let result = jaw_heuristic(&bare_face, &config).unwrap();
        assert!(!result.is_speaking);
        assert_eq!(result.method, SpeakingMethod::NoDetection);

        let person = Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), EngineKind::ObjectYolo, "person");
        assert!(jaw_heuristic(&person, &config).is_none());
    }
}
