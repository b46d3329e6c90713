//! Detection and tracking crate for VidTrack
//!
//! Provides the detection-engine contract and capability table, the
//! subprocess engine adapter, the centroid tracker, speaking fusion, and
//! loaders for the per-video analysis artifacts.

pub mod artifacts;
pub mod detection;
pub mod engines;
pub mod error;
pub mod gpu;
pub mod speaking;
pub mod subprocess;
pub mod tracker;
pub mod traits;

pub use artifacts::{segment_position, AudioTimeline, SegmentTimeline};
pub use detection::{parse_detection, parse_frame_detections};
pub use engines::{create_engine, engine_spec, EngineCapabilities, EngineSpec, GpuSupport};
pub use error::EngineError;
pub use gpu::{cuda_provider_available, parse_free_memory_mb, query_free_memory_mb, GpuProbeReport};
pub use speaking::{jaw_heuristic, SpeakingClassifier};
pub use subprocess::SubprocessEngine;
pub use tracker::{CentroidTracker, TrackedObject};
pub use traits::{DetectionEngine, FrameDetections, FrameOutcome, FrameRange, VideoProbe};
