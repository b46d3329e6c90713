//! Engine capability table
//!
//! Every engine declares whether it needs, can use, or cannot use a GPU and
//! which runtime environment it has to run in. The scheduler consults this
//! table before dispatch; the worker uses it to build the engine adapter.

use crate::subprocess::SubprocessEngine;
use crate::traits::DetectionEngine;
use vidtrack_types::{EngineCommand, EngineKind, RuntimeId};

/// GPU requirement of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuSupport {
    /// Cannot run without CUDA
    GpuOnly,
    /// Accelerated when a GPU is healthy, otherwise runs on CPU
    GpuOptional,
    /// Never uses a GPU
    CpuOnly,
}

/// Static description of one engine
#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub kind: EngineKind,
    pub gpu: GpuSupport,
    pub runtime: RuntimeId,
    /// Emits face detections (as opposed to generic objects)
    pub face_signal: bool,
    /// Emits expression blendshapes
    pub blendshapes: bool,
    /// Label used when the engine omits one
    pub default_label: &'static str,
    pub description: &'static str,
}

static ENGINE_TABLE: [EngineSpec; 5] = [
    EngineSpec {
        kind: EngineKind::Yunet,
        gpu: GpuSupport::CpuOnly,
        runtime: RuntimeId::Default,
        face_signal: true,
        blendshapes: false,
        default_label: "face",
        description: "OpenCV YuNet face detector",
    },
    EngineSpec {
        kind: EngineKind::FaceLandmarker,
        gpu: GpuSupport::GpuOptional,
        runtime: RuntimeId::Onnx,
        face_signal: true,
        blendshapes: true,
        default_label: "face",
        description: "Face landmarks with expression blendshapes",
    },
    EngineSpec {
        kind: EngineKind::ObjectYolo,
        gpu: GpuSupport::GpuOptional,
        runtime: RuntimeId::Onnx,
        face_signal: false,
        blendshapes: false,
        default_label: "object",
        description: "Generic object detector",
    },
    EngineSpec {
        kind: EngineKind::Eos3dmm,
        gpu: GpuSupport::CpuOnly,
        runtime: RuntimeId::Eos,
        face_signal: true,
        blendshapes: false,
        default_label: "face",
        description: "3D morphable-model face fitter",
    },
    EngineSpec {
        kind: EngineKind::FaceRecognitionCuda,
        gpu: GpuSupport::GpuOnly,
        runtime: RuntimeId::CudaFace,
        face_signal: true,
        blendshapes: false,
        default_label: "face",
        description: "CUDA face-recognition backend",
    },
];

/// Capability metadata for an engine
pub fn engine_spec(kind: EngineKind) -> &'static EngineSpec {
    match kind {
        EngineKind::Yunet => &ENGINE_TABLE[0],
        EngineKind::FaceLandmarker => &ENGINE_TABLE[1],
        EngineKind::ObjectYolo => &ENGINE_TABLE[2],
        EngineKind::Eos3dmm => &ENGINE_TABLE[3],
        EngineKind::FaceRecognitionCuda => &ENGINE_TABLE[4],
    }
}

/// Capability lookups directly on `EngineKind`
pub trait EngineCapabilities {
    fn spec(&self) -> &'static EngineSpec;

    fn gpu_support(&self) -> GpuSupport {
        self.spec().gpu
    }

    fn runtime(&self) -> RuntimeId {
        self.spec().runtime
    }

    fn is_face_engine(&self) -> bool {
        self.spec().face_signal
    }
}

impl EngineCapabilities for EngineKind {
    fn spec(&self) -> &'static EngineSpec {
        engine_spec(*self)
    }
}

/// Default executable name for an engine, looked up on PATH
pub fn default_engine_program(kind: EngineKind) -> String {
    format!("vidtrack-engine-{}", kind.as_str())
}

/// Create the adapter that drives an engine executable
pub fn create_engine(
    kind: EngineKind,
    command: EngineCommand,
    use_gpu: bool,
) -> Box<dyn DetectionEngine> {
    let use_gpu = match kind.gpu_support() {
        GpuSupport::CpuOnly => {
            if use_gpu {
                tracing::debug!("Engines: {} is CPU-only, ignoring GPU request", kind);
            }
            false
        }
        GpuSupport::GpuOnly => true,
        GpuSupport::GpuOptional => use_gpu,
    };

    tracing::info!(
        "Engines: created {} engine ({}, gpu={})",
        kind,
        kind.spec().description,
        use_gpu
    );
    Box::new(SubprocessEngine::new(kind, command, use_gpu))
}
