//! Capability resolution
//!
//! Decides, before anything is dispatched, which lanes serve the batch. The
//! outcome is returned as a `PlacementDecision` so overrides and fallbacks are
//! explicit and testable instead of silent branches.

use crate::config::BatchConfig;
use crate::error::{SchedulerError, SchedulerResult};
use vidtrack_ml::{EngineCapabilities, GpuProbeReport, GpuSupport};
use vidtrack_types::{EngineKind, Lane};

/// GPU health check, run inside the engine's runtime environment
pub trait GpuProbe: Send + Sync {
    fn probe(&self, engine: EngineKind) -> GpuProbeReport;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementDecision {
    /// GPU-optional engine with a healthy GPU: both lanes pull from the queue
    GpuAccelerated,
    /// GPU-only engine: the CPU lane is disabled for this run
    GpuExclusive,
    /// GPU disabled by configuration
    CpuRequested,
    /// CPU-only engine requested with GPU enabled; runs on CPU anyway
    CpuOverride,
    /// GPU probe failed and fallback is enabled
    CpuFallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanePlan {
    pub engine: EngineKind,
    pub gpu_lane: bool,
    pub cpu_lane: bool,
    pub decision: PlacementDecision,
}

impl LanePlan {
    fn gpu_and_cpu(engine: EngineKind) -> Self {
        Self {
            engine,
            gpu_lane: true,
            cpu_lane: true,
            decision: PlacementDecision::GpuAccelerated,
        }
    }

    fn cpu(engine: EngineKind, decision: PlacementDecision) -> Self {
        Self {
            engine,
            gpu_lane: false,
            cpu_lane: true,
            decision,
        }
    }

    /// Enabled lanes, GPU first
    pub fn lanes(&self) -> Vec<Lane> {
        let mut lanes = Vec::with_capacity(2);
        if self.gpu_lane {
            lanes.push(Lane::Gpu);
        }
        if self.cpu_lane {
            lanes.push(Lane::Cpu);
        }
        lanes
    }
}

/// Why a probe report is not good enough
fn unhealthy_reason(report: &GpuProbeReport, min_free_mb: u64) -> String {
    if let Some(error) = &report.error {
        return error.clone();
    }
    if !report.cuda_available {
        return "CUDA execution provider unavailable".to_string();
    }
    match report.free_memory_mb {
        Some(free) => format!("{} MiB free, {} MiB required", free, min_free_mb),
        None => "free GPU memory unknown".to_string(),
    }
}

/// Resolve lanes for the configured engine
pub fn resolve_placement(config: &BatchConfig, probe: &dyn GpuProbe) -> SchedulerResult<LanePlan> {
    let engine = config.engine;

    match engine.gpu_support() {
        GpuSupport::CpuOnly => {
            if config.use_gpu {
                tracing::warn!(
                    "Capability: {} is CPU-only, ignoring GPU request and running on CPU",
                    engine
                );
                Ok(LanePlan::cpu(engine, PlacementDecision::CpuOverride))
            } else {
                Ok(LanePlan::cpu(engine, PlacementDecision::CpuRequested))
            }
        }

        GpuSupport::GpuOnly => {
            if !config.use_gpu {
                return Err(SchedulerError::Configuration(format!(
                    "engine {} requires a GPU but GPU use is disabled",
                    engine
                )));
            }
            if !config.is_gpu_allowlisted(engine) {
                return Err(SchedulerError::Configuration(format!(
                    "engine {} requires a GPU and is not in the GPU allow-list",
                    engine
                )));
            }
            let report = probe.probe(engine);
            if !report.is_healthy(config.min_free_gpu_memory_mb) {
                return Err(SchedulerError::Configuration(format!(
                    "engine {} requires a GPU but the GPU probe failed: {}",
                    engine,
                    unhealthy_reason(&report, config.min_free_gpu_memory_mb)
                )));
            }
            tracing::info!("Capability: {} runs on the GPU lane only", engine);
            Ok(LanePlan {
                engine,
                gpu_lane: true,
                cpu_lane: false,
                decision: PlacementDecision::GpuExclusive,
            })
        }

        GpuSupport::GpuOptional => {
            if !config.use_gpu {
                return Ok(LanePlan::cpu(engine, PlacementDecision::CpuRequested));
            }
            let report = probe.probe(engine);
            if report.is_healthy(config.min_free_gpu_memory_mb) {
                tracing::info!(
                    "Capability: GPU healthy for {} ({} MiB free)",
                    engine,
                    report.free_memory_mb.unwrap_or_default()
                );
                return Ok(LanePlan::gpu_and_cpu(engine));
            }

            let reason = unhealthy_reason(&report, config.min_free_gpu_memory_mb);
            if config.gpu_fallback {
                tracing::warn!(
                    "Capability: GPU unavailable for {} ({}), falling back to CPU",
                    engine,
                    reason
                );
                Ok(LanePlan::cpu(engine, PlacementDecision::CpuFallback { reason }))
            } else {
                Err(SchedulerError::Configuration(format!(
                    "GPU unavailable for {} and fallback is disabled: {}",
                    engine, reason
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedProbe {
        report: GpuProbeReport,
        calls: Mutex<Vec<EngineKind>>,
    }

    impl ScriptedProbe {
        fn healthy() -> Self {
            Self::with(GpuProbeReport {
                free_memory_mb: Some(8192),
                cuda_available: true,
                error: None,
            })
        }

        fn with(report: GpuProbeReport) -> Self {
            Self {
                report,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl GpuProbe for ScriptedProbe {
        fn probe(&self, engine: EngineKind) -> GpuProbeReport {
            self.calls.lock().push(engine);
            self.report.clone()
        }
    }

    fn config(engine: EngineKind, use_gpu: bool) -> BatchConfig {
        BatchConfig {
            engine,
            use_gpu,
            ..Default::default()
        }
    }

    #[test]
    fn test_gpu_only_engine_without_gpu_is_configuration_error() {
        let probe = ScriptedProbe::healthy();
        let cfg = BatchConfig {
            gpu_allowlist: vec![EngineKind::FaceRecognitionCuda],
            ..config(EngineKind::FaceRecognitionCuda, false)
        };

        let err = resolve_placement(&cfg, &probe).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
        assert!(probe.calls.lock().is_empty());
    }

    #[test]
    fn test_gpu_only_engine_requires_allowlist() {
        let probe = ScriptedProbe::healthy();
        let cfg = config(EngineKind::FaceRecognitionCuda, true);
        assert!(matches!(
            resolve_placement(&cfg, &probe),
            Err(SchedulerError::Configuration(_))
        ));

        let cfg = BatchConfig {
            gpu_allowlist: vec![EngineKind::FaceRecognitionCuda],
            ..cfg
        };
        let plan = resolve_placement(&cfg, &probe).unwrap();
        assert_eq!(plan.decision, PlacementDecision::GpuExclusive);
        assert_eq!(plan.lanes(), vec![Lane::Gpu]);
    }

    #[test]
    fn test_gpu_only_engine_with_failed_probe_never_falls_back() {
        let probe = ScriptedProbe::with(GpuProbeReport {
            free_memory_mb: Some(100),
            cuda_available: true,
            error: None,
        });
        let cfg = BatchConfig {
            gpu_allowlist: vec![EngineKind::FaceRecognitionCuda],
            ..config(EngineKind::FaceRecognitionCuda, true)
        };
        let err = resolve_placement(&cfg, &probe).unwrap_err();
        assert!(err.to_string().contains("100 MiB free"));
    }

    #[test]
    fn test_cpu_only_engine_overrides_gpu_flag() {
        let probe = ScriptedProbe::healthy();
        let plan = resolve_placement(&config(EngineKind::Yunet, true), &probe).unwrap();
        assert_eq!(plan.decision, PlacementDecision::CpuOverride);
        assert_eq!(plan.lanes(), vec![Lane::Cpu]);
        assert!(probe.calls.lock().is_empty());

        let plan = resolve_placement(&config(EngineKind::Eos3dmm, false), &probe).unwrap();
        assert_eq!(plan.decision, PlacementDecision::CpuRequested);
    }

    #[test]
    fn test_optional_engine_uses_both_lanes_when_healthy() {
        let probe = ScriptedProbe::healthy();
        let plan = resolve_placement(&config(EngineKind::FaceLandmarker, true), &probe).unwrap();
        assert_eq!(plan.decision, PlacementDecision::GpuAccelerated);
        assert_eq!(plan.lanes(), vec![Lane::Gpu, Lane::Cpu]);
        assert_eq!(*probe.calls.lock(), vec![EngineKind::FaceLandmarker]);
    }

    #[test]
    fn test_optional_engine_fallback() {
        let probe = ScriptedProbe::with(GpuProbeReport {
            free_memory_mb: Some(16000),
            cuda_available: false,
            error: None,
        });
        let plan = resolve_placement(&config(EngineKind::ObjectYolo, true), &probe).unwrap();
        assert_eq!(
            plan.decision,
            PlacementDecision::CpuFallback {
                reason: "CUDA execution provider unavailable".into()
            }
        );
        assert_eq!(plan.lanes(), vec![Lane::Cpu]);

        let strict = BatchConfig {
            gpu_fallback: false,
            ..config(EngineKind::ObjectYolo, true)
        };
        assert!(matches!(
            resolve_placement(&strict, &probe),
            Err(SchedulerError::Configuration(_))
        ));
    }

    #[test]
    fn test_optional_engine_with_gpu_disabled_skips_probe() {
        let probe = ScriptedProbe::healthy();
        let plan = resolve_placement(&config(EngineKind::FaceLandmarker, false), &probe).unwrap();
        assert_eq!(plan.decision, PlacementDecision::CpuRequested);
        assert!(probe.calls.lock().is_empty());
    }
}
