//! Resource-aware job scheduler
//!
//! Placement is resolved once, before anything is dispatched. Each enabled
//! lane then runs as its own thread pulling jobs from one shared queue and
//! running them end-to-end, one at a time. The queue is filled up front and
//! its sender dropped, so a lane exits as soon as the queue is empty.

use crate::batch::Job;
use crate::capability::{resolve_placement, GpuProbe, LanePlan};
use crate::config::BatchConfig;
use crate::error::SchedulerResult;
use crate::launcher::JobRunner;
use crate::progress::{Aggregator, JobState, StatusBoard, StatusPublisher};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use vidtrack_types::{Lane, StatusLine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed(String),
}

/// Final state of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub video_path: PathBuf,
    /// Lane the job ran on; `None` when it never started
    pub lane: Option<Lane>,
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub plan: LanePlan,
    /// In batch order
    pub outcomes: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(JobOutcome::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

pub struct Scheduler<'a> {
    config: &'a BatchConfig,
    runner: &'a dyn JobRunner,
    probe: &'a dyn GpuProbe,
    publisher: &'a dyn StatusPublisher,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        config: &'a BatchConfig,
        runner: &'a dyn JobRunner,
        probe: &'a dyn GpuProbe,
        publisher: &'a dyn StatusPublisher,
    ) -> Self {
        Self {
            config,
            runner,
            probe,
            publisher,
        }
    }

    /// Run every job; only configuration errors are returned as `Err`
    pub fn run(&self, jobs: Vec<Job>) -> SchedulerResult<BatchReport> {
        let plan = resolve_placement(self.config, self.probe)?;
        tracing::info!(
            "Scheduler: {} job(s) with {}, lanes {:?} ({:?})",
            jobs.len(),
            plan.engine,
            plan.lanes(),
            plan.decision
        );

        if jobs.is_empty() {
            tracing::warn!("Scheduler: batch is empty, nothing to do");
            return Ok(BatchReport {
                plan,
                outcomes: Vec::new(),
            });
        }

        let order: Vec<(String, PathBuf)> = jobs
            .iter()
            .map(|job| (job.id.clone(), job.video_path.clone()))
            .collect();
        let board = StatusBoard::new(order.iter().map(|(id, _)| id.clone()));
        let outcomes: Mutex<HashMap<String, JobOutcome>> = Mutex::new(HashMap::new());

        let (sender, queue) = crossbeam_channel::bounded(jobs.len());
        for job in jobs {
            // Capacity equals the batch size and the receiver is alive
            let _ = sender.send(job);
        }
        drop(sender);

        let aggregator = Aggregator::new(
            &board,
            self.publisher,
            self.config.status_interval(),
            self.config.final_drain_delay(),
        );

        thread::scope(|scope| {
            let aggregator_handle = scope.spawn(|| aggregator.run());

            let lanes: Vec<_> = plan
                .lanes()
                .into_iter()
                .map(|lane| {
                    let queue = queue.clone();
                    let board = &board;
                    let outcomes = &outcomes;
                    (
                        lane,
                        scope.spawn(move || self.lane_loop(lane, &queue, board, outcomes)),
                    )
                })
                .collect();

            for (lane, handle) in lanes {
                if handle.join().is_err() {
                    tracing::error!("Scheduler: {} lane stopped unexpectedly", lane);
                }
            }

            // Anything a crashed lane left behind
            let mut outcomes = outcomes.lock();
            for job_id in board.fail_unfinished() {
                tracing::error!("Scheduler: {} never finished", job_id);
                self.publisher.publish(&StatusLine::JobFailed(job_id.clone()));
                outcomes.entry(job_id.clone()).or_insert_with(|| JobOutcome {
                    video_path: order
                        .iter()
                        .find(|(id, _)| *id == job_id)
                        .map(|(_, path)| path.clone())
                        .unwrap_or_default(),
                    job_id,
                    lane: None,
                    status: JobStatus::Failed("lane stopped before the job finished".into()),
                });
            }
            drop(outcomes);

            if aggregator_handle.join().is_err() {
                tracing::error!("Scheduler: progress aggregator stopped unexpectedly");
            }
        });

        let mut outcomes = outcomes.into_inner();
        let outcomes: Vec<JobOutcome> = order
            .into_iter()
            .filter_map(|(id, _)| outcomes.remove(&id))
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(
            "Scheduler: batch finished, {} completed, {} failed",
            outcomes.len() - failed,
            failed
        );
        Ok(BatchReport { plan, outcomes })
    }

    fn lane_loop(
        &self,
        lane: Lane,
        queue: &Receiver<Job>,
        board: &StatusBoard,
        outcomes: &Mutex<HashMap<String, JobOutcome>>,
    ) {
        tracing::info!("Scheduler: {} lane started", lane);

        while let Ok(job) = queue.recv() {
            tracing::info!(
                "Scheduler: dispatching {} to {} lane ({})",
                job.id,
                lane,
                job.video_path.display()
            );
            board.set(&job.id, JobState::started(lane));

            let status = match self.runner.run(&job, lane, board) {
                Ok(()) => {
                    tracing::info!("Scheduler: {} completed on {} lane", job.id, lane);
                    board.set(&job.id, JobState::Completed);
                    self.publisher.publish(&StatusLine::JobSucceeded(job.id.clone()));
                    JobStatus::Completed
                }
                Err(e) => {
                    tracing::error!("Scheduler: {} failed on {} lane: {}", job.id, lane, e);
                    board.set(&job.id, JobState::Failed);
                    self.publisher.publish(&StatusLine::JobFailed(job.id.clone()));
                    JobStatus::Failed(e.to_string())
                }
            };

            outcomes.lock().insert(
                job.id.clone(),
                JobOutcome {
                    job_id: job.id,
                    video_path: job.video_path,
                    lane: Some(lane),
                    status,
                },
            );
        }

        tracing::info!("Scheduler: {} lane idle, queue empty", lane);
    }
}
