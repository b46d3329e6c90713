//! GPU health probing
//!
//! Two checks decide whether a GPU lane is usable: enough free device memory
//! (queried through `nvidia-smi`) and an available CUDA execution provider in
//! the ONNX Runtime the engine environment links against.

use anyhow::{Context, Result};
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};

/// Outcome of a GPU probe, printed as one JSON line by `vidtrack-worker --probe-gpu`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuProbeReport {
    /// Largest free memory across visible devices, in MiB
    #[serde(default)]
    pub free_memory_mb: Option<u64>,
    #[serde(default)]
    pub cuda_available: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl GpuProbeReport {
    /// Probe from inside the current process environment
    pub fn local() -> Self {
        let mut report = GpuProbeReport {
            cuda_available: cuda_provider_available(),
            ..Default::default()
        };
        match query_free_memory_mb() {
            Ok(free) => report.free_memory_mb = Some(free),
            Err(e) => report.error = Some(e.to_string()),
        }
        report
    }

    /// Healthy when CUDA is available and at least `min_free_mb` is free
    pub fn is_healthy(&self, min_free_mb: u64) -> bool {
        self.cuda_available && self.free_memory_mb.is_some_and(|free| free >= min_free_mb)
    }
}

/// Whether ONNX Runtime can register the CUDA execution provider
pub fn cuda_provider_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::warn!("GPU: CUDA provider check failed: {}", e);
            false
        }
    }
}

/// Parse `nvidia-smi --query-gpu=memory.free --format=csv,noheader,nounits`
pub fn parse_free_memory_mb(output: &str) -> Option<u64> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u64>().ok())
        .max()
}

/// Largest free memory across visible GPUs, in MiB
pub fn query_free_memory_mb() -> Result<u64> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.free", "--format=csv,noheader,nounits"])
        .stdin(Stdio::null())
        .output()
        .context("Failed to run nvidia-smi")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("nvidia-smi failed: {}", stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_free_memory_mb(&stdout).context("nvidia-smi reported no GPUs")
}
