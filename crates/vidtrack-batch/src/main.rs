//! `vidtrack` command-line entry point
//!
//! Exit codes: 0 when every job completed, 1 when any job failed, 2 when the
//! run was rejected before dispatch (configuration or batch file error).

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use vidtrack_batch::config::default_log_dir;
use vidtrack_batch::{
    build_jobs, logging, read_batch_file, BatchConfig, CliOverrides, ProcessRunner,
    RuntimeGpuProbe, Scheduler, SchedulerError, StdoutPublisher,
};
use vidtrack_types::EngineKind;

#[derive(Debug, Parser)]
#[command(name = "vidtrack", version, about = "Track faces and objects across a batch of videos")]
struct Cli {
    /// File listing absolute video paths, one per line
    #[arg(long)]
    batch_file: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Detection engine (yunet, face-landmarker, object-yolo, eos-3dmm, face-recognition-cuda)
    #[arg(long)]
    engine: Option<EngineKind>,

    /// Run everything on the CPU lane
    #[arg(long)]
    disable_gpu: bool,

    /// Frame-range workers inside each CPU job
    #[arg(long)]
    cpu_worker_count: Option<usize>,

    /// Fail instead of falling back to CPU when the GPU probe fails
    #[arg(long)]
    no_gpu_fallback: bool,

    /// Allow a GPU-only engine to be dispatched (repeatable)
    #[arg(long = "allow-gpu-engine")]
    allow_gpu_engines: Vec<EngineKind>,

    /// Directory for rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            engine: self.engine,
            disable_gpu: self.disable_gpu,
            cpu_worker_count: self.cpu_worker_count,
            no_gpu_fallback: self.no_gpu_fallback,
            allow_gpu_engines: self.allow_gpu_engines.clone(),
            log_dir: self.log_dir.clone(),
        }
    }
}

fn run(cli: &Cli, config: BatchConfig) -> Result<bool, SchedulerError> {
    let videos = read_batch_file(&cli.batch_file)?;
    let jobs = build_jobs(videos, &config);

    let runner = ProcessRunner::new(config.clone());
    let probe = RuntimeGpuProbe::new(config.clone());
    let publisher = StdoutPublisher;
    let report = Scheduler::new(&config, &runner, &probe, &publisher).run(jobs)?;

    for outcome in report.failed() {
        tracing::error!(
            "Job {} ({}) failed: {:?}",
            outcome.job_id,
            outcome.video_path.display(),
            outcome.status
        );
    }
    Ok(report.all_succeeded())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let overrides = cli.overrides();
    let config = BatchConfig::load(cli.config.as_deref(), &overrides);

    let log_dir = match &config {
        Ok(cfg) => cfg.log_dir(),
        Err(_) => overrides.log_dir.clone().unwrap_or_else(default_log_dir),
    };
    let _guard = match logging::init(&log_dir) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("vidtrack: file logging disabled: {:#}", e);
            None
        }
    };

    tracing::info!("Starting vidtrack {}", env!("CARGO_PKG_VERSION"));

    match config.and_then(|cfg| run(&cli, cfg)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) if e.is_fatal() => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(1)
        }
    }
}
