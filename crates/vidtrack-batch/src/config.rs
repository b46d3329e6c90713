//! Batch configuration
//!
//! Loaded once per run: JSON file (optional) first, then CLI overrides, then
//! validation. Workers never read this; each job gets a resolved
//! `WorkerJobConfig` on stdin instead.

use crate::error::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vidtrack_ml::engines::default_engine_program;
use vidtrack_ml::EngineCapabilities;
use vidtrack_types::{EngineCommand, EngineKind, RuntimeId, SpeakingConfig, TrackerConfig};

pub const WORKER_BINARY_NAME: &str = "vidtrack-worker";

const DEFAULT_MIN_FREE_GPU_MEMORY_MB: u64 = 1024;
const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;
const DEFAULT_FINAL_DRAIN_DELAY_MS: u64 = 2000;
const DEFAULT_FRAME_ERROR_TOLERANCE: u64 = 5;

/// How to enter one runtime environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Wrapper program the worker is started through (e.g. `conda`)
    pub launcher: Option<PathBuf>,
    /// Arguments placed before the worker path (e.g. `run -n onnx --no-capture-output`)
    pub launcher_args: Vec<String>,
    /// Directories prepended to PATH
    pub path_prepend: Vec<PathBuf>,
    /// Directories prepended to the dynamic library search path
    pub library_paths: Vec<PathBuf>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    pub engine: EngineKind,
    pub use_gpu: bool,
    /// Frame-range fan-out inside CPU lane jobs
    pub cpu_worker_count: usize,
    /// GPU-only engines must be listed here to be dispatched
    pub gpu_allowlist: Vec<EngineKind>,
    /// Fall back to CPU when the GPU probe fails for a GPU-optional engine
    pub gpu_fallback: bool,
    pub min_free_gpu_memory_mb: u64,
    pub worker_binary: Option<PathBuf>,
    pub engines: BTreeMap<EngineKind, EngineCommand>,
    pub runtimes: BTreeMap<RuntimeId, RuntimeSettings>,
    pub tracker: TrackerConfig,
    pub speaking: SpeakingConfig,
    pub status_interval_ms: u64,
    pub final_drain_delay_ms: u64,
    pub log_dir: Option<PathBuf>,
    pub frame_error_tolerance: u64,
    /// Kill a worker that runs longer than this; no limit when unset
    pub job_timeout_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::FaceLandmarker,
            use_gpu: true,
            cpu_worker_count: default_cpu_worker_count(),
            gpu_allowlist: Vec::new(),
            gpu_fallback: true,
            min_free_gpu_memory_mb: DEFAULT_MIN_FREE_GPU_MEMORY_MB,
            worker_binary: None,
            engines: BTreeMap::new(),
            runtimes: BTreeMap::new(),
            tracker: TrackerConfig::default(),
            speaking: SpeakingConfig::default(),
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
            final_drain_delay_ms: DEFAULT_FINAL_DRAIN_DELAY_MS,
            log_dir: None,
            frame_error_tolerance: DEFAULT_FRAME_ERROR_TOLERANCE,
            job_timeout_secs: None,
        }
    }
}

/// Half the logical CPUs, at least one
pub fn default_cpu_worker_count() -> usize {
    (num_cpus::get() / 2).max(1)
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vidtrack")
        .join("logs")
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub engine: Option<EngineKind>,
    pub disable_gpu: bool,
    pub cpu_worker_count: Option<usize>,
    pub no_gpu_fallback: bool,
    pub allow_gpu_engines: Vec<EngineKind>,
    pub log_dir: Option<PathBuf>,
}

impl BatchConfig {
    /// File, then CLI overrides, then validation
    pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> SchedulerResult<Self> {
        let mut cfg = match path {
            Some(path) => read_config_file(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(engine) = overrides.engine {
            self.engine = engine;
        }
        if overrides.disable_gpu {
            self.use_gpu = false;
        }
        if let Some(count) = overrides.cpu_worker_count {
            self.cpu_worker_count = count;
        }
        if overrides.no_gpu_fallback {
            self.gpu_fallback = false;
        }
        for engine in &overrides.allow_gpu_engines {
            if !self.gpu_allowlist.contains(engine) {
                self.gpu_allowlist.push(*engine);
            }
        }
        if let Some(dir) = &overrides.log_dir {
            self.log_dir = Some(dir.clone());
        }
    }

    pub fn validate(&mut self) -> SchedulerResult<()> {
        if self.cpu_worker_count == 0 {
            tracing::warn!("Config: cpuWorkerCount is 0, using 1");
            self.cpu_worker_count = 1;
        }

        let distance = self.tracker.distance_threshold;
        if !distance.is_finite() || distance <= 0.0 {
            return Err(SchedulerError::Configuration(format!(
                "tracker.distanceThreshold must be a positive number, got {}",
                distance
            )));
        }

        for (name, weight) in [
            ("speaking.audioWeight", self.speaking.audio_weight),
            ("speaking.visualWeight", self.speaking.visual_weight),
            (
                "speaking.minConfidenceThreshold",
                self.speaking.min_confidence_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(SchedulerError::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, weight
                )));
            }
        }

        let jaw = self.speaking.jaw_open_threshold;
        if !jaw.is_finite() || jaw <= 0.0 {
            return Err(SchedulerError::Configuration(format!(
                "speaking.jawOpenThreshold must be a positive number, got {}",
                jaw
            )));
        }

        if self.status_interval_ms == 0 {
            return Err(SchedulerError::Configuration(
                "statusIntervalMs must be greater than zero".into(),
            ));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(SchedulerError::Configuration(
                "jobTimeoutSecs must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }

    /// Command that starts `kind`, defaulting to `vidtrack-engine-<name>` on PATH
    pub fn engine_command(&self, kind: EngineKind) -> EngineCommand {
        self.engines
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| EngineCommand {
                program: PathBuf::from(default_engine_program(kind)),
                args: Vec::new(),
            })
    }

    /// Runtime environment settings for `kind`
    pub fn runtime_for(&self, kind: EngineKind) -> RuntimeSettings {
        self.runtimes
            .get(&kind.runtime())
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_gpu_allowlisted(&self, kind: EngineKind) -> bool {
        self.gpu_allowlist.contains(&kind)
    }

    /// Worker binary: configured path, else next to the running executable, else PATH
    pub fn worker_binary(&self) -> PathBuf {
        if let Some(path) = &self.worker_binary {
            return path.clone();
        }
        let file_name = format!("{}{}", WORKER_BINARY_NAME, std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
            .filter(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(file_name))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(default_log_dir)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn final_drain_delay(&self) -> Duration {
        Duration::from_millis(self.final_drain_delay_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

fn read_config_file(path: &Path) -> SchedulerResult<BatchConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SchedulerError::Configuration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        SchedulerError::Configuration(format!("invalid config file {}: {}", path.display(), e))
    })
}
