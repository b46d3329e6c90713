//! Scheduler-side error taxonomy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Engine/GPU capability mismatch; aborts the run before any dispatch
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Runtime or executable missing; fails only this job
    #[error("dispatch of {job} failed: {message}")]
    Dispatch { job: String, message: String },

    /// Worker exited non-zero; fails only this job
    #[error("worker for {job} exited with {code}: {tail}")]
    WorkerExit {
        job: String,
        code: String,
        tail: String,
    },

    #[error("batch file error: {0}")]
    BatchFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Errors that stop the whole run rather than one job
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_) | SchedulerError::BatchFile(_)
        )
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
