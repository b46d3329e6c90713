//! GPU probing through the engine runtime
//!
//! The CUDA provider check only means something inside the runtime the engine
//! will actually use, so the worker binary is started there with
//! `--probe-gpu`. Free memory falls back to a local `nvidia-smi` query when the
//! runtime cannot report it.

use crate::capability::GpuProbe;
use crate::config::BatchConfig;
use crate::launcher::build_worker_command;
use anyhow::{Context, Result};
use std::process::Stdio;
use vidtrack_ml::{query_free_memory_mb, GpuProbeReport};
use vidtrack_types::EngineKind;

/// Last line of probe output that parses as a report
pub fn parse_probe_output(stdout: &str) -> Option<GpuProbeReport> {
    stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str(line.trim()).ok())
}

pub struct RuntimeGpuProbe {
    config: BatchConfig,
}

impl RuntimeGpuProbe {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    fn probe_in_runtime(&self, engine: EngineKind) -> Result<GpuProbeReport> {
        let output = build_worker_command(&self.config, engine)?
            .arg("--probe-gpu")
            .stdin(Stdio::null())
            .output()
            .context("Failed to run GPU probe")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("GPU probe exited with {}: {}", output.status, stderr.trim());
        }
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
            .context("GPU probe printed no report")
    }
}

impl GpuProbe for RuntimeGpuProbe {
    fn probe(&self, engine: EngineKind) -> GpuProbeReport {
        let mut report = match self.probe_in_runtime(engine) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Probe: runtime probe for {} failed: {:#}", engine, e);
                GpuProbeReport {
                    error: Some(format!("{:#}", e)),
                    ..Default::default()
                }
            }
        };

        if report.free_memory_mb.is_none() {
            match query_free_memory_mb() {
                Ok(free) => report.free_memory_mb = Some(free),
                Err(e) => tracing::debug!("Probe: nvidia-smi unavailable: {:#}", e),
            }
        }

        tracing::debug!("Probe: {} -> {:?}", engine, report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output_skips_noise() {
        let stdout = "loading libcudart\n{\"freeMemoryMb\":6144,\"cudaAvailable\":true}\n\n";
        let report = parse_probe_output(stdout).unwrap();
        assert_eq!(report.free_memory_mb, Some(6144));
        assert!(report.cuda_available);
        assert!(report.error.is_none());

        assert!(parse_probe_output("no json here\n").is_none());
    }

    #[test]
    fn test_unreachable_runtime_reports_error() {
        let cfg = BatchConfig {
            worker_binary: Some("/nonexistent/vidtrack-worker".into()),
            ..Default::default()
        };
        let report = RuntimeGpuProbe::new(cfg).probe(EngineKind::FaceLandmarker);
        assert!(!report.cuda_available);
        assert!(report.error.is_some());
        assert!(!report.is_healthy(0));
    }
}
