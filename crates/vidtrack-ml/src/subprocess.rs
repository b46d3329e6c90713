//! Detection engine running as an external executable
//!
//! The engine process decodes the video itself and prints one JSON
//! `EngineMessage` per line on stdout. Each frame range runs in its own
//! process, so a crashing model cannot take the worker down with it.

use crate::detection::parse_frame_detections;
use crate::error::EngineError;
use crate::traits::{DetectionEngine, FrameDetections, FrameOutcome, FrameRange, VideoProbe};
use vidtrack_types::{EngineCommand, EngineKind, EngineMessage};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

/// Lines of engine stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

pub struct SubprocessEngine {
    kind: EngineKind,
    command: EngineCommand,
    use_gpu: bool,
}

impl SubprocessEngine {
    pub fn new(kind: EngineKind, command: EngineCommand, use_gpu: bool) -> Self {
        Self {
            kind,
            command,
            use_gpu,
        }
    }

    fn base_command(&self, video: &Path) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args);
        cmd.arg("--video").arg(video);
        if self.use_gpu {
            cmd.arg("--gpu");
        }
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            program: self.command.program.display().to_string(),
            source,
        }
    }

    /// Handle one stdout line; returns false for lines outside the protocol
    fn handle_line(
        &self,
        line: &str,
        range: FrameRange,
        sink: &mut dyn FnMut(FrameDetections),
    ) -> bool {
        let message: EngineMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(_) => return false,
        };

        match message {
            EngineMessage::Meta { .. } => {}
            EngineMessage::Frame { frame, detections } => {
                if !range.contains(frame) {
                    tracing::warn!(
                        "SubprocessEngine: {} reported frame {} outside {}..={}",
                        self.kind,
                        frame,
                        range.start,
                        range.end
                    );
                    return true;
                }
                let detections = parse_frame_detections(detections, self.kind, frame);
                sink(FrameDetections {
                    frame,
                    outcome: FrameOutcome::Detections(detections),
                });
            }
            EngineMessage::FrameError { frame, message } => {
                if range.contains(frame) {
                    sink(FrameDetections {
                        frame,
                        outcome: FrameOutcome::Unreadable(message),
                    });
                }
            }
        }
        true
    }

    /// Feed stdout lines to `handle_line`; returns the count of ignored lines.
    /// Bytes that are not valid UTF-8 are replaced, so a garbled log line is
    /// just another non-protocol line.
    fn read_stdout(
        &self,
        stdout: impl Read,
        range: FrameRange,
        sink: &mut dyn FnMut(FrameDetections),
    ) -> std::io::Result<usize> {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut ignored = 0usize;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !self.handle_line(line, range, sink) {
                ignored += 1;
            }
        }
        Ok(ignored)
    }
}

impl DetectionEngine for SubprocessEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn probe(&self, video: &Path) -> Result<VideoProbe, EngineError> {
        let output = self
            .base_command(video)
            .arg("--probe")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!("SubprocessEngine: {} probe failed: {}", self.kind, stderr);
            return Err(EngineError::Exit {
                status: output.status.to_string(),
                tail: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Ok(EngineMessage::Meta { total_frames, fps }) = serde_json::from_str(line) {
                return Ok(VideoProbe { total_frames, fps });
            }
        }

        Err(EngineError::Protocol(format!(
            "{} probe of {} printed no meta line",
            self.kind,
            video.display()
        )))
    }

    fn detect_range(
        &self,
        video: &Path,
        range: FrameRange,
        sink: &mut dyn FnMut(FrameDetections),
    ) -> Result<(), EngineError> {
        if range.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let mut child = self
            .base_command(video)
            .arg("--start-frame")
            .arg(range.start.to_string())
            .arg("--end-frame")
            .arg(range.end.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout not available".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stderr not available".into()))?;

        // Drain stderr so a chatty engine never blocks on a full pipe
        let kind = self.kind;
        let stderr_thread = thread::spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                tracing::debug!("Engine {}: {}", kind, line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let ignored = match self.read_stdout(stdout, range, sink) {
            Ok(ignored) => ignored,
            Err(e) => {
                tracing::error!(
                    "SubprocessEngine: {} stdout failed for frames {}..={}: {}",
                    self.kind,
                    range.start,
                    range.end,
                    e
                );
                let _ = child.kill();
                let _ = child.wait();
                let _ = stderr_thread.join();
                return Err(e.into());
            }
        };

        let status = child.wait()?;
        let tail = stderr_thread.join().unwrap_or_default();

        if ignored > 0 {
            tracing::debug!(
                "SubprocessEngine: {} printed {} non-protocol lines",
                self.kind,
                ignored
            );
        }

        if !status.success() {
            return Err(EngineError::Exit {
                status: status.to_string(),
                tail,
            });
        }

        tracing::info!(
            "SubprocessEngine: {} processed frames {}..={} in {:.2}s",
            self.kind,
            range.start,
            range.end,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}
