//! Progress aggregation
//!
//! Line readers write the latest status of their job into the `StatusBoard`;
//! the `Aggregator` republishes the whole board as one
//! `[Progression-MultiLine]` line per tick until every job is terminal and the
//! final drain delay has passed.

use crossbeam_channel::tick;
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};
use vidtrack_types::{Lane, StatusLine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running {
        lane: Lane,
        percent: u32,
        current_frame: u64,
        total_frames: u64,
    },
    Completed,
    Failed,
}

impl JobState {
    pub fn started(lane: Lane) -> Self {
        JobState::Running {
            lane,
            percent: 0,
            current_frame: 0,
            total_frames: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => f.write_str("queued"),
            JobState::Running {
                lane,
                percent,
                current_frame,
                total_frames,
            } => write!(
                f,
                "running {} {}% ({}/{})",
                lane, percent, current_frame, total_frames
            ),
            JobState::Completed => f.write_str("completed"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

/// Latest known state per job, in batch order
#[derive(Debug, Default)]
pub struct StatusBoard {
    jobs: Mutex<Vec<(String, JobState)>>,
}

impl StatusBoard {
    pub fn new<I, S>(job_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let jobs = job_ids
            .into_iter()
            .map(|id| (id.into(), JobState::Queued))
            .collect();
        Self {
            jobs: Mutex::new(jobs),
        }
    }

    pub fn set(&self, job: &str, state: JobState) {
        let mut jobs = self.jobs.lock();
        match jobs.iter_mut().find(|(id, _)| id == job) {
            Some((_, current)) => *current = state,
            None => jobs.push((job.to_string(), state)),
        }
    }

    /// Record a `[Progression]` update; ignored once the job is terminal
    pub fn update_progress(&self, job: &str, lane: Lane, percent: u32, current: u64, total: u64) {
        let mut jobs = self.jobs.lock();
        if let Some((_, state)) = jobs.iter_mut().find(|(id, _)| id == job) {
            if !state.is_terminal() {
                *state = JobState::Running {
                    lane,
                    percent: percent.min(100),
                    current_frame: current,
                    total_frames: total,
                };
            }
        }
    }

    pub fn state(&self, job: &str) -> Option<JobState> {
        self.jobs
            .lock()
            .iter()
            .find(|(id, _)| id == job)
            .map(|(_, state)| state.clone())
    }

    pub fn all_terminal(&self) -> bool {
        self.jobs.lock().iter().all(|(_, state)| state.is_terminal())
    }

    /// Mark every non-terminal job failed and return their ids
    pub fn fail_unfinished(&self) -> Vec<String> {
        let mut jobs = self.jobs.lock();
        jobs.iter_mut()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(id, state)| {
                *state = JobState::Failed;
                id.clone()
            })
            .collect()
    }

    pub fn snapshot(&self) -> StatusLine {
        let entries = self
            .jobs
            .lock()
            .iter()
            .map(|(id, state)| (id.clone(), state.to_string()))
            .collect();
        StatusLine::MultiLine(entries)
    }
}

/// Destination of protocol lines for the outer orchestrator
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, line: &StatusLine);
}

/// Protocol lines on stdout; logs stay on stderr
#[derive(Debug, Default)]
pub struct StdoutPublisher;

impl StatusPublisher for StdoutPublisher {
    fn publish(&self, line: &StatusLine) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!("Progress: failed to write status line: {}", e);
        }
    }
}

/// Timer loop that republishes the board
pub struct Aggregator<'a> {
    board: &'a StatusBoard,
    publisher: &'a dyn StatusPublisher,
    interval: Duration,
    drain_delay: Duration,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        board: &'a StatusBoard,
        publisher: &'a dyn StatusPublisher,
        interval: Duration,
        drain_delay: Duration,
    ) -> Self {
        Self {
            board,
            publisher,
            interval,
            drain_delay,
        }
    }

    /// Blocks until all jobs are terminal and the drain delay has elapsed
    pub fn run(&self) {
        let ticker = tick(self.interval);
        let mut drained_since: Option<Instant> = None;

        while ticker.recv().is_ok() {
            self.publisher.publish(&self.board.snapshot());

            if self.board.all_terminal() {
                let since = *drained_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.drain_delay {
                    break;
                }
            } else {
                drained_since = None;
            }
        }

        self.publisher.publish(&self.board.snapshot());
        tracing::debug!("Progress: aggregator stopped");
    }
}

/// Collects published lines in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryPublisher {
    pub lines: Mutex<Vec<StatusLine>>,
}

#[cfg(test)]
impl StatusPublisher for MemoryPublisher {
    fn publish(&self, line: &StatusLine) {
        self.lines.lock().push(line.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_state_strings() {
        assert_eq!(JobState::Queued.to_string(), "queued");
        assert_eq!(
            JobState::Running {
                lane: Lane::Gpu,
                percent: 42,
                current_frame: 420,
                total_frames: 1000
            }
            .to_string(),
            "running GPU 42% (420/1000)"
        );
        assert_eq!(JobState::Completed.to_string(), "completed");
        assert_eq!(JobState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_board_snapshot_keeps_batch_order() {
        let board = StatusBoard::new(["b", "a", "c"]);
        board.set("a", JobState::started(Lane::Cpu));
        board.update_progress("a", Lane::Cpu, 10, 5, 50);
        board.set("c", JobState::Failed);

        assert_eq!(
            board.snapshot().to_string(),
            "[Progression-MultiLine]b: queued || a: running CPU 10% (5/50) || c: failed"
        );
    }

    #[test]
    fn test_progress_after_terminal_is_ignored() {
        let board = StatusBoard::new(["a"]);
        board.set("a", JobState::Completed);
        board.update_progress("a", Lane::Gpu, 50, 1, 2);
        assert_eq!(board.state("a"), Some(JobState::Completed));
    }

    #[test]
    fn test_fail_unfinished() {
        let board = StatusBoard::new(["a", "b", "c"]);
        board.set("a", JobState::Completed);
        board.set("b", JobState::started(Lane::Gpu));
        assert_eq!(board.fail_unfinished(), vec!["b".to_string(), "c".to_string()]);
        assert!(board.all_terminal());
    }

    #[test]
    fn test_aggregator_stops_after_drain() {
        let board = StatusBoard::new(["a", "b"]);
        let publisher = MemoryPublisher::default();
        let aggregator = Aggregator::new(
            &board,
            &publisher,
            Duration::from_millis(5),
            Duration::from_millis(20),
        );

        thread::scope(|scope| {
            let handle = scope.spawn(|| aggregator.run());
            board.set("a", JobState::started(Lane::Gpu));
            thread::sleep(Duration::from_millis(30));
            board.set("a", JobState::Completed);
            board.set("b", JobState::Failed);
            handle.join().unwrap();
        });

        let lines = publisher.lines.lock();
        assert!(lines.len() >= 2);
        assert_eq!(
            lines.last().unwrap().to_string(),
            "[Progression-MultiLine]a: completed || b: failed"
        );
        assert!(lines
            .iter()
            .all(|line| matches!(line, StatusLine::MultiLine(entries) if entries.len() == 2)));
    }
}
