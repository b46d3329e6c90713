//! Batch scheduling for VidTrack
//!
//! Reads a batch of videos, resolves GPU/CPU placement for the configured
//! engine, runs one worker process per video across the enabled lanes and
//! republishes combined progress on stdout.

pub mod batch;
pub mod capability;
pub mod config;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod probe;
pub mod progress;
pub mod scheduler;

pub use batch::{build_jobs, parse_batch, read_batch_file, Job};
pub use capability::{resolve_placement, GpuProbe, LanePlan, PlacementDecision};
pub use config::{BatchConfig, CliOverrides, RuntimeSettings};
pub use error::{SchedulerError, SchedulerResult};
pub use launcher::{build_worker_command, JobRunner, ProcessRunner};
pub use probe::RuntimeGpuProbe;
pub use progress::{Aggregator, JobState, StatusBoard, StatusPublisher, StdoutPublisher};
pub use scheduler::{BatchReport, JobOutcome, JobStatus, Scheduler};
