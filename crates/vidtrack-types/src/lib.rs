//! Shared types for VidTrack
//!
//! This crate contains all data structures that cross a process or crate
//! boundary: detections coming out of engines, tracked-object records going
//! into the output file, analysis artifacts, job configuration sent to
//! workers, and the line protocols spoken on worker/engine stdout.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

// ============================================================================
// Engine & Runtime Identity
// ============================================================================

/// Supported detection engines.
///
/// Closed set: every engine the scheduler can dispatch is listed here, and its
/// capability metadata lives in `vidtrack_ml::engines`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineKind {
    /// OpenCV YuNet face detector
    #[serde(rename = "yunet")]
    Yunet,
    /// Face landmarks with expression blendshapes
    #[serde(rename = "face-landmarker")]
    FaceLandmarker,
    /// Generic object detector (persons, objects; no face signal)
    #[serde(rename = "object-yolo")]
    ObjectYolo,
    /// 3D morphable-model fitter
    #[serde(rename = "eos-3dmm")]
    Eos3dmm,
    /// CUDA face-recognition backend
    #[serde(rename = "face-recognition-cuda")]
    FaceRecognitionCuda,
}

impl EngineKind {
    pub const ALL: [EngineKind; 5] = [
        EngineKind::Yunet,
        EngineKind::FaceLandmarker,
        EngineKind::ObjectYolo,
        EngineKind::Eos3dmm,
        EngineKind::FaceRecognitionCuda,
    ];

    /// Canonical name, as accepted by `--engine`
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Yunet => "yunet",
            EngineKind::FaceLandmarker => "face-landmarker",
            EngineKind::ObjectYolo => "object-yolo",
            EngineKind::Eos3dmm => "eos-3dmm",
            EngineKind::FaceRecognitionCuda => "face-recognition-cuda",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown engine name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown engine '{0}' (expected one of: yunet, face-landmarker, object-yolo, eos-3dmm, face-recognition-cuda)")]
pub struct UnknownEngine(pub String);

impl FromStr for EngineKind {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EngineKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| UnknownEngine(s.to_string()))
    }
}

/// Runtime environment an engine must execute in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeId {
    /// The scheduler's own environment
    Default,
    /// ONNX Runtime environment
    Onnx,
    /// Environment with the EOS fitting libraries
    Eos,
    /// Environment with CUDA face-recognition libraries
    CudaFace,
}

impl RuntimeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeId::Default => "default",
            RuntimeId::Onnx => "onnx",
            RuntimeId::Eos => "eos",
            RuntimeId::CudaFace => "cuda-face",
        }
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler resource lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Gpu,
    Cpu,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Gpu => f.write_str("GPU"),
            Lane::Cpu => f.write_str("CPU"),
        }
    }
}

// ============================================================================
// Geometry & Detection Types
// ============================================================================

/// Axis-aligned bounding box in pixels, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> Point2 {
        Point2 {
            x: self.x + self.w / 2.0,
            y: self.y + self.h / 2.0,
        }
    }

    pub fn x_max(&self) -> f64 {
        self.x + self.w
    }

    pub fn y_max(&self) -> f64 {
        self.y + self.h
    }

    /// Finite coordinates and non-negative extent
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite())
            && self.w >= 0.0
            && self.h >= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Blendshape name for the jaw-open expression signal
pub const JAW_OPEN: &str = "jawOpen";

/// Auxiliary mouth-shape blendshapes averaged into the visual speaking signal
pub const MOUTH_AUX_BLENDSHAPES: [&str; 6] = [
    "mouthFunnel",
    "mouthPucker",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
];

/// A single object detected in one frame by one engine.
///
/// Transient: produced fresh each frame, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub bbox: BBox,
    pub centroid: Point2,
    pub source: EngineKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blendshapes: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Point3>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_coeffs: Option<serde_json::Value>,
}

impl Detection {
    /// Detection with only geometry and a label; centroid is the bbox center
    pub fn new(bbox: BBox, source: EngineKind, label: impl Into<String>) -> Self {
        Self {
            centroid: bbox.center(),
            bbox,
            source,
            label: label.into(),
            confidence: None,
            blendshapes: None,
            landmarks: None,
            model_coeffs: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_blendshapes(mut self, blendshapes: BTreeMap<String, f64>) -> Self {
        self.blendshapes = Some(blendshapes);
        self
    }

    /// Jaw-open intensity, if the engine produced blendshapes
    pub fn jaw_open(&self) -> Option<f64> {
        self.blendshapes
            .as_ref()
            .and_then(|shapes| shapes.get(JAW_OPEN).copied())
    }

    /// Geometry usable for matching
    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid() && self.centroid.is_finite()
    }
}

/// Detection as emitted on an engine's stdout, before validation.
///
/// `bbox` is `[x, y, w, h]`, `centroid` is `[x, y]`, landmarks are `[x, y, z]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetection {
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub centroid: Option<[f64; 2]>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub blendshapes: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub landmarks: Option<Vec<[f64; 3]>>,
    #[serde(default)]
    pub model_coeffs: Option<serde_json::Value>,
}

/// One line of an engine's stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineMessage {
    /// Video properties, emitted first (and alone in `--probe` mode)
    #[serde(rename = "meta")]
    Meta {
        #[serde(rename = "totalFrames")]
        total_frames: u64,
        fps: f64,
    },
    /// Detections for one 1-based frame
    #[serde(rename = "frame")]
    Frame {
        frame: u64,
        #[serde(default)]
        detections: Vec<RawDetection>,
    },
    /// The engine could not read or decode this frame
    #[serde(rename = "frameError")]
    FrameError { frame: u64, message: String },
}

// ============================================================================
// Analysis Artifacts
// ============================================================================

/// Scene boundary record from the scene-segmentation artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInfo {
    pub id: i64,
    pub frame_start: u64,
    pub frame_end: u64,
}

/// `<stem>.scenes.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentArtifact {
    #[serde(default)]
    pub segments: Vec<SegmentInfo>,
}

/// Diarization snapshot for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrameInfo {
    #[serde(default)]
    pub is_speech_present: bool,
    #[serde(default)]
    pub num_speakers: u32,
    #[serde(default)]
    pub active_speaker_labels: Vec<String>,
    #[serde(default)]
    pub timecode_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrameEntry {
    pub frame: u64,
    #[serde(flatten)]
    pub info: AudioFrameInfo,
}

/// `<stem>.audio.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioArtifact {
    #[serde(default)]
    pub frames: Vec<AudioFrameEntry>,
}

// ============================================================================
// Speaking Classification Types
// ============================================================================

/// Which evidence decided a speaking result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakingMethod {
    AudioDominant,
    VisualDominant,
    /// Audio evidence attributed to a detection with no face signal
    ObjectDetectionFallback,
    NoDetection,
    /// Jaw-threshold heuristic used when the fusion classifier is disabled
    VisualHeuristic,
}

impl SpeakingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakingMethod::AudioDominant => "audio_dominant",
            SpeakingMethod::VisualDominant => "visual_dominant",
            SpeakingMethod::ObjectDetectionFallback => "object_detection_fallback",
            SpeakingMethod::NoDetection => "no_detection",
            SpeakingMethod::VisualHeuristic => "visual_heuristic",
        }
    }
}

/// Inputs that went into a speaking decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingEvidence {
    pub audio_confidence: f64,
    pub visual_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jaw_open: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mouth_aux: Option<f64>,
    pub num_speakers: u32,
    #[serde(default)]
    pub active_speakers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<i64>,
    /// Relative position inside the current scene, 0.0..=1.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_position: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingResult {
    pub is_speaking: bool,
    pub confidence: f64,
    pub method: SpeakingMethod,
    pub evidence: SpeakingEvidence,
}

// ============================================================================
// Tracking Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Maximum centroid distance (pixels) for a detection to continue a track
    pub distance_threshold: f64,
    /// A track is dropped once it has gone unmatched for more frames than this
    pub deregister_threshold: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 100.0,
            deregister_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeakingConfig {
    /// Use audio/visual fusion; when false only the jaw heuristic runs
    pub enhanced: bool,
    pub audio_weight: f64,
    pub visual_weight: f64,
    pub min_confidence_threshold: f64,
    pub jaw_open_threshold: f64,
}

impl Default for SpeakingConfig {
    fn default() -> Self {
        Self {
            enhanced: true,
            audio_weight: 0.6,
            visual_weight: 0.4,
            min_confidence_threshold: 0.3,
            jaw_open_threshold: 0.3,
        }
    }
}

// ============================================================================
// Output Artifact
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub video_path: String,
    pub total_frames: u64,
    pub fps: f64,
    pub tracking_engine: String,
}

/// One tracked object as written to the output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedObjectRecord {
    pub id: String,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub bbox_xmin: f64,
    pub bbox_xmax: f64,
    pub bbox_ymin: f64,
    pub bbox_ymax: f64,
    pub bbox_width: f64,
    pub bbox_height: f64,
    pub source: EngineKind,
    pub label: String,
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blendshapes: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_speaking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaking_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaking_method: Option<SpeakingMethod>,
}

impl TrackedObjectRecord {
    pub fn set_speaking(&mut self, result: &SpeakingResult) {
        self.is_speaking = Some(result.is_speaking);
        self.speaking_confidence = Some(result.confidence);
        self.speaking_method = Some(result.method);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    /// 1-based frame number
    pub frame: u64,
    pub tracked_objects: Vec<TrackedObjectRecord>,
}

/// Full per-video output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingOutput {
    pub metadata: VideoMetadata,
    pub frames: Vec<FrameRecord>,
}

// ============================================================================
// Worker IPC Types
// ============================================================================

/// How to start one engine executable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Everything a worker needs to process one video.
///
/// Serialized once by the scheduler and handed to the worker as its first
/// stdin line; the worker reads no other configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJobConfig {
    pub job_id: String,
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    pub engine: EngineKind,
    pub engine_command: EngineCommand,
    pub use_gpu: bool,
    /// Parallel engine processes inside the job (frame-range fan-out)
    pub worker_count: usize,
    pub tracker: TrackerConfig,
    pub speaking: SpeakingConfig,
    #[serde(default)]
    pub segments_path: Option<PathBuf>,
    #[serde(default)]
    pub audio_path: Option<PathBuf>,
    /// Frame read errors this close to the end of the stream are expected
    #[serde(default)]
    pub frame_error_tolerance: u64,
}

/// Worker command for IPC
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerCommand {
    /// Process one video end-to-end
    Run { job: WorkerJobConfig },
}

// ============================================================================
// Status Line Protocol
// ============================================================================

pub const PROGRESS_PREFIX: &str = "[Progression]";
pub const MULTILINE_PREFIX: &str = "[Progression-MultiLine]";
pub const MANAGER_PREFIX: &str = "[Gestionnaire]";
const MULTILINE_SEPARATOR: &str = " || ";
const SUCCESS_MARKER: &str = "Succès pour ";
const FAILURE_MARKER: &str = "Échec pour ";

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[Progression\]\|(\d+)\|(\d+)\|(\d+)\s*$").expect("progress regex is valid")
    })
}

/// A line of the stdout status protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// `[Progression]|<percent>|<currentFrame>|<totalFrames>`
    Progress {
        percent: u32,
        current_frame: u64,
        total_frames: u64,
    },
    /// `[Progression-MultiLine]<job>: <status> || ...`
    MultiLine(Vec<(String, String)>),
    /// `[Gestionnaire] Succès pour <job>`
    JobSucceeded(String),
    /// `[Gestionnaire] Échec pour <job>`
    JobFailed(String),
}

impl StatusLine {
    /// Progress line with the percentage derived from the frame counters
    pub fn progress(current_frame: u64, total_frames: u64) -> Self {
        let percent = if total_frames == 0 {
            0
        } else {
            ((current_frame.min(total_frames) * 100) / total_frames) as u32
        };
        StatusLine::Progress {
            percent,
            current_frame,
            total_frames,
        }
    }

    /// Parse one line; anything not in the protocol yields `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(caps) = progress_regex().captures(line) {
            return Some(StatusLine::Progress {
                percent: caps[1].parse().ok()?,
                current_frame: caps[2].parse().ok()?,
                total_frames: caps[3].parse().ok()?,
            });
        }

        if let Some(rest) = line.strip_prefix(MULTILINE_PREFIX) {
            let entries = rest
                .split(MULTILINE_SEPARATOR)
                .filter_map(|entry| {
                    let (job, status) = entry.split_once(": ")?;
                    Some((job.trim().to_string(), status.trim().to_string()))
                })
                .collect();
            return Some(StatusLine::MultiLine(entries));
        }

        let rest = line.strip_prefix(MANAGER_PREFIX)?.trim_start();
        if let Some(job) = rest.strip_prefix(SUCCESS_MARKER) {
            return Some(StatusLine::JobSucceeded(job.trim().to_string()));
        }
        if let Some(job) = rest.strip_prefix(FAILURE_MARKER) {
            return Some(StatusLine::JobFailed(job.trim().to_string()));
        }
        None
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Progress {
                percent,
                current_frame,
                total_frames,
            } => write!(
                f,
                "{}|{}|{}|{}",
                PROGRESS_PREFIX, percent, current_frame, total_frames
            ),
            StatusLine::MultiLine(entries) => {
                let joined = entries
                    .iter()
                    .map(|(job, status)| format!("{}: {}", job, status))
                    .collect::<Vec<_>>()
                    .join(MULTILINE_SEPARATOR);
                write!(f, "{}{}", MULTILINE_PREFIX, joined)
            }
            StatusLine::JobSucceeded(job) => {
                write!(f, "{} {}{}", MANAGER_PREFIX, SUCCESS_MARKER, job)
            }
            StatusLine::JobFailed(job) => {
                write!(f, "{} {}{}", MANAGER_PREFIX, FAILURE_MARKER, job)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names_parse() {
        for kind in EngineKind::ALL {
            assert_eq!(kind.as_str().parse::<EngineKind>().unwrap(), kind);
        }
        assert_eq!(
            " Face-Landmarker ".parse::<EngineKind>().unwrap(),
            EngineKind::FaceLandmarker
        );
        assert!("mediapipe-v0".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_engine_serde_uses_canonical_names() {
        let json = serde_json::to_string(&EngineKind::Eos3dmm).unwrap();
        assert_eq!(json, "\"eos-3dmm\"");
    }

    #[test]
    fn test_progress_line() {
        let line = StatusLine::progress(450, 1000).to_string();
        assert_eq!(line, "[Progression]|45|450|1000");
        assert_eq!(
            StatusLine::parse(&line),
            Some(StatusLine::Progress {
                percent: 45,
                current_frame: 450,
                total_frames: 1000
            })
        );
        assert_eq!(StatusLine::parse("[Progression]|x|1|2"), None);
        assert_eq!(StatusLine::parse("decoding frame 12"), None);
    }

    #[test]
    fn test_multiline_and_markers() {
        let line = StatusLine::MultiLine(vec![
            ("clip_a".into(), "completed".into()),
            ("clip_b".into(), "running GPU 12% (12/100)".into()),
        ])
        .to_string();
        assert_eq!(
            line,
            "[Progression-MultiLine]clip_a: completed || clip_b: running GPU 12% (12/100)"
        );
        match StatusLine::parse(&line) {
            Some(StatusLine::MultiLine(entries)) => assert_eq!(entries.len(), 2),
            other => panic!("unexpected parse: {:?}", other),
        }

        assert_eq!(
            StatusLine::parse("[Gestionnaire] Succès pour clip_a"),
            Some(StatusLine::JobSucceeded("clip_a".into()))
        );
        assert_eq!(
            StatusLine::parse("[Gestionnaire] Échec pour clip_b\n"),
            Some(StatusLine::JobFailed("clip_b".into()))
        );
    }

    #[test]
    fn test_engine_message_wire_format() {
        let line = r#"{"type":"frame","frame":3,"detections":[{"bbox":[1,2,3,4],"label":"face"}]}"#;
        let msg: EngineMessage = serde_json::from_str(line).unwrap();
        match msg {
            EngineMessage::Frame { frame, detections } => {
                assert_eq!(frame, 3);
                assert_eq!(detections[0].bbox, Some([1.0, 2.0, 3.0, 4.0]));
                assert!(detections[0].centroid.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let meta: EngineMessage =
            serde_json::from_str(r#"{"type":"meta","totalFrames":120,"fps":29.97}"#).unwrap();
        assert_eq!(
            meta,
            EngineMessage::Meta {
                total_frames: 120,
                fps: 29.97
            }
        );
    }

    #[test]
    fn test_record_skips_absent_speaking_fields() {
        let record = TrackedObjectRecord {
            id: "1".into(),
            centroid_x: 5.0,
            centroid_y: 5.0,
            bbox_xmin: 0.0,
            bbox_xmax: 10.0,
            bbox_ymin: 0.0,
            bbox_ymax: 10.0,
            bbox_width: 10.0,
            bbox_height: 10.0,
            source: EngineKind::ObjectYolo,
            label: "person".into(),
            confidence: None,
            blendshapes: None,
            is_speaking: None,
            speaking_confidence: None,
            speaking_method: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("isSpeaking").is_none());
        assert_eq!(value["bboxXmax"], 10.0);
        assert_eq!(value["source"], "object-yolo");
    }
}
