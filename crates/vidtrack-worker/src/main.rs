//! VidTrack Worker Process
//!
//! Processes one video per process: the scheduler writes a single
//! `WorkerCommand` JSON line to stdin, the worker runs detection, tracking and
//! speaking fusion, writes the output JSON and exits.
//!
//! stdout carries the `[Progression]` protocol; logs go to stderr.

mod output;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vidtrack_ml::{create_engine, GpuProbeReport};
use vidtrack_types::WorkerCommand;

#[derive(Debug, Parser)]
#[command(name = "vidtrack-worker", about = "Runs one video tracking job")]
struct Args {
    /// Print a GPU probe report as JSON and exit
    #[arg(long)]
    probe_gpu: bool,
}

fn main() {
    // Initialize tracing to stderr (stdout is for the status protocol)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();

    let result = if args.probe_gpu {
        run_probe()
    } else {
        run_worker()
    };

    if let Err(e) = result {
        tracing::error!("Worker error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_probe() -> Result<()> {
    let report = GpuProbeReport::local();
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", serde_json::to_string(&report)?)?;
    stdout.flush()?;
    Ok(())
}

fn run_worker() -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("Failed to read worker command")?;
    if line.trim().is_empty() {
        anyhow::bail!("No worker command received on stdin");
    }

    let WorkerCommand::Run { job } =
        serde_json::from_str(line.trim()).context("Invalid worker command")?;

    tracing::info!(
        "Worker starting job {} ({} with {}, gpu={}, workers={})",
        job.job_id,
        job.video_path.display(),
        job.engine,
        job.use_gpu,
        job.worker_count
    );

    let engine = create_engine(job.engine, job.engine_command.clone(), job.use_gpu);
    let mut stdout = io::stdout();
    let output = pipeline::run_job(&job, engine.as_ref(), &mut stdout)?;

    tracing::info!(
        "Worker finished job {}: {} frames written to {}",
        job.job_id,
        output.frames.len(),
        job.output_path.display()
    );
    Ok(())
}
