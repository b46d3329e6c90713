//! Worker process launch and monitoring
//!
//! One worker process per job, started inside the engine's runtime
//! environment. The job config goes in as a single stdin line; stdout and
//! stderr are drained on their own threads so a chatty worker never stalls on
//! a full pipe.

use crate::batch::Job;
use crate::config::{BatchConfig, RuntimeSettings};
use crate::error::{SchedulerError, SchedulerResult};
use crate::progress::StatusBoard;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use vidtrack_types::{EngineKind, Lane, StatusLine, WorkerCommand};

const TAIL_LINES: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(windows)]
const LIBRARY_PATH_VAR: &str = "PATH";
#[cfg(not(any(target_os = "macos", windows)))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Runs one job to completion on a lane
pub trait JobRunner: Send + Sync {
    fn run(&self, job: &Job, lane: Lane, board: &StatusBoard) -> SchedulerResult<()>;
}

/// Resolve a program given either as a path or as a name on PATH
fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        if program.is_file() {
            return Ok(program.to_path_buf());
        }
        anyhow::bail!("{} does not exist", program.display());
    }
    which::which(program).with_context(|| format!("{} not found on PATH", program.display()))
}

/// `dirs` followed by the current value of `var`
fn prepend_paths(var: &str, dirs: &[PathBuf]) -> Result<OsString> {
    let existing = std::env::var_os(var).unwrap_or_default();
    let joined = dirs
        .iter()
        .cloned()
        .chain(std::env::split_paths(&existing))
        .filter(|p| !p.as_os_str().is_empty());
    std::env::join_paths(joined).with_context(|| format!("Invalid entry for {}", var))
}

fn apply_runtime_env(command: &mut Command, runtime: &RuntimeSettings) -> Result<()> {
    if !runtime.path_prepend.is_empty() {
        command.env("PATH", prepend_paths("PATH", &runtime.path_prepend)?);
    }
    if !runtime.library_paths.is_empty() {
        command.env(
            LIBRARY_PATH_VAR,
            prepend_paths(LIBRARY_PATH_VAR, &runtime.library_paths)?,
        );
    }
    command.envs(&runtime.env);
    Ok(())
}

/// Command that starts the worker binary inside the runtime of `engine`
pub fn build_worker_command(config: &BatchConfig, engine: EngineKind) -> Result<Command> {
    let runtime = config.runtime_for(engine);
    let worker = config.worker_binary();

    let mut command = match &runtime.launcher {
        Some(launcher) => {
            let launcher = resolve_program(launcher).context("Runtime launcher unavailable")?;
            let mut command = Command::new(launcher);
            command.args(&runtime.launcher_args).arg(&worker);
            command
        }
        None => {
            let worker = resolve_program(&worker).context("Worker binary unavailable")?;
            Command::new(worker)
        }
    };
    apply_runtime_env(&mut command, &runtime)?;
    Ok(command)
}

/// Last lines of worker output, kept for failure reports
#[derive(Debug, Default)]
struct OutputTail {
    lines: Mutex<VecDeque<String>>,
}

impl OutputTail {
    fn push(&self, line: &str) {
        let mut lines = self.lines.lock();
        if lines.len() == TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    fn joined(&self) -> String {
        self.lines.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn drain_stdout(
    stdout: impl Read,
    job: &Job,
    lane: Lane,
    board: &StatusBoard,
    tail: &OutputTail,
) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Launcher: {} stdout read failed: {}", job.id, e);
                break;
            }
        };
        match StatusLine::parse(&line) {
            Some(StatusLine::Progress {
                percent,
                current_frame,
                total_frames,
            }) => board.update_progress(&job.id, lane, percent, current_frame, total_frames),
            _ => {
                tracing::debug!("Worker {}: {}", job.id, line);
                tail.push(&line);
            }
        }
    }
}

fn drain_stderr(stderr: impl Read, job: &Job, tail: &OutputTail) {
    for line in BufReader::new(stderr).lines().map_while(|line| line.ok()) {
        tracing::debug!("Worker {} stderr: {}", job.id, line);
        tail.push(&line);
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut(Duration),
}

fn wait_for(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<WaitOutcome> {
    let Some(timeout) = timeout else {
        return child.wait().map(WaitOutcome::Exited);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(status));
        }
        if started.elapsed() >= timeout {
            child.kill()?;
            child.wait()?;
            return Ok(WaitOutcome::TimedOut(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Launches real worker processes
pub struct ProcessRunner {
    config: BatchConfig,
}

impl ProcessRunner {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }
}

impl JobRunner for ProcessRunner {
    fn run(&self, job: &Job, lane: Lane, board: &StatusBoard) -> SchedulerResult<()> {
        let dispatch_error = |message: String| SchedulerError::Dispatch {
            job: job.id.clone(),
            message,
        };

        let command_line = serde_json::to_string(&WorkerCommand::Run {
            job: job.worker_config(lane, &self.config),
        })
        .map_err(|e| dispatch_error(e.to_string()))?;

        let mut command = build_worker_command(&self.config, job.engine)
            .map_err(|e| dispatch_error(format!("{:#}", e)))?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::info!(
            "Launcher: starting worker for {} on {} lane ({})",
            job.id,
            lane,
            job.video_path.display()
        );
        let mut child = command
            .spawn()
            .map_err(|e| dispatch_error(format!("failed to start worker: {}", e)))?;

        // Dropping stdin after the single command line closes it
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = writeln!(stdin, "{}", command_line).and_then(|_| stdin.flush()) {
                tracing::warn!("Launcher: could not send job to worker {}: {}", job.id, e);
            }
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tail = OutputTail::default();
        let tail = &tail;

        let outcome = thread::scope(|scope| {
            if let Some(stdout) = stdout {
                scope.spawn(move || drain_stdout(stdout, job, lane, board, tail));
            }
            if let Some(stderr) = stderr {
                scope.spawn(move || drain_stderr(stderr, job, tail));
            }
            wait_for(&mut child, self.config.job_timeout())
        })?;

        match outcome {
            WaitOutcome::Exited(status) if status.success() => {
                tracing::info!("Launcher: worker for {} exited cleanly", job.id);
                Ok(())
            }
            WaitOutcome::Exited(status) => Err(SchedulerError::WorkerExit {
                job: job.id.clone(),
                code: status
                    .code()
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| status.to_string()),
                tail: tail.joined(),
            }),
            WaitOutcome::TimedOut(limit) => Err(SchedulerError::WorkerExit {
                job: job.id.clone(),
                code: format!("timeout after {}s", limit.as_secs()),
                tail: tail.joined(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::JobState;
    use std::collections::BTreeMap;
    use vidtrack_types::RuntimeId;

    #[test]
    fn test_missing_launcher_is_reported() {
        let mut runtimes = BTreeMap::new();
        runtimes.insert(
            RuntimeId::Onnx,
            RuntimeSettings {
                launcher: Some(PathBuf::from("vidtrack-no-such-launcher")),
                ..Default::default()
            },
        );
        let cfg = BatchConfig {
            runtimes,
            ..Default::default()
        };
        let err = build_worker_command(&cfg, EngineKind::FaceLandmarker).unwrap_err();
        assert!(format!("{:#}", err).contains("Runtime launcher unavailable"));
    }

    #[test]
    fn test_runtime_env_injection() {
        let dir = tempfile::tempdir().unwrap();
        let worker = dir.path().join("vidtrack-worker");
        std::fs::write(&worker, "").unwrap();

        let mut env = BTreeMap::new();
        env.insert("EOS_MODEL_DIR".to_string(), "/opt/eos/share".to_string());
        let mut runtimes = BTreeMap::new();
        runtimes.insert(
            RuntimeId::Eos,
            RuntimeSettings {
                path_prepend: vec![PathBuf::from("/opt/eos/bin")],
                library_paths: vec![PathBuf::from("/opt/eos/lib")],
                env,
                ..Default::default()
            },
        );
        let cfg = BatchConfig {
            worker_binary: Some(worker.clone()),
            runtimes,
            ..Default::default()
        };

        let command = build_worker_command(&cfg, EngineKind::Eos3dmm).unwrap();
        assert_eq!(command.get_program(), worker.as_os_str());

        let envs: BTreeMap<_, _> = command
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().into_owned(), v?.to_owned())))
            .collect();
        let path = envs["PATH"].to_string_lossy().into_owned();
        assert!(path.starts_with("/opt/eos/bin"));
        let libs = envs[LIBRARY_PATH_VAR].to_string_lossy().into_owned();
        assert!(libs.starts_with("/opt/eos/lib"));
        assert_eq!(envs["EOS_MODEL_DIR"], "/opt/eos/share");
    }

    #[test]
    fn test_output_tail_is_bounded() {
        let tail = OutputTail::default();
        for i in 0..30 {
            tail.push(&format!("line {}", i));
        }
        let joined = tail.joined();
        assert!(joined.starts_with("line 10\n"));
        assert!(joined.ends_with("line 29"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use vidtrack_types::EngineKind;

        /// Runs `script` through `sh` in place of the worker binary
        fn runner(dir: &Path, script: &str, timeout: Option<u64>) -> (ProcessRunner, Job) {
            let script_path = dir.join("fake-worker.sh");
            std::fs::write(&script_path, script).unwrap();

            let mut runtimes = BTreeMap::new();
            runtimes.insert(
                RuntimeId::Default,
                RuntimeSettings {
                    launcher: Some(PathBuf::from("sh")),
                    ..Default::default()
                },
            );
            let cfg = BatchConfig {
                engine: EngineKind::Yunet,
                worker_binary: Some(script_path),
                runtimes,
                job_timeout_secs: timeout,
                ..Default::default()
            };
            let job = Job::new("clip", dir.join("clip.mp4"), &cfg);
            (ProcessRunner::new(cfg), job)
        }

        #[test]
        fn test_progress_reaches_board() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, job) = runner(
                dir.path(),
                "read cmd\necho \"[Progression]|50|5|10\"\necho warming >&2\necho \"[Progression]|100|10|10\"\n",
                None,
            );
            let board = StatusBoard::new(["clip"]);

            runner.run(&job, Lane::Cpu, &board).unwrap();
            assert_eq!(
                board.state("clip"),
                Some(JobState::Running {
                    lane: Lane::Cpu,
                    percent: 100,
                    current_frame: 10,
                    total_frames: 10
                })
            );
        }

        #[test]
        fn test_non_zero_exit_carries_tail() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, job) = runner(
                dir.path(),
                "read cmd\necho \"$cmd\" | grep -q '\"type\":\"Run\"' || exit 9\necho boom >&2\nexit 3\n",
                None,
            );
            let board = StatusBoard::new(["clip"]);

            match runner.run(&job, Lane::Cpu, &board) {
                Err(SchedulerError::WorkerExit { job, code, tail }) => {
                    assert_eq!(job, "clip");
                    assert_eq!(code, "3");
                    assert!(tail.contains("boom"));
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }

        #[test]
        fn test_timeout_kills_worker() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, job) = runner(dir.path(), "read cmd\nexec sleep 30\n", Some(1));
            let board = StatusBoard::new(["clip"]);

            let started = Instant::now();
            let err = runner.run(&job, Lane::Cpu, &board).unwrap_err();
            assert!(started.elapsed() < Duration::from_secs(10));
            assert!(matches!(
                err,
                SchedulerError::WorkerExit { ref code, .. } if code.starts_with("timeout")
            ));
        }
    }
}
