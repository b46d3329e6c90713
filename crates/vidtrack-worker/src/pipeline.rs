//! Per-job processing pipeline
//!
//! Detection fans out over frame ranges (one engine process per range) and
//! may finish in any order. Tracking and speaking fusion then run once,
//! single-threaded, in ascending frame order: track IDs and unseen counters
//! depend on it.

use crate::output;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::thread;
use vidtrack_ml::{
    jaw_heuristic, AudioTimeline, CentroidTracker, DetectionEngine, EngineError, FrameDetections,
    FrameOutcome, FrameRange, SegmentTimeline, SpeakingClassifier, VideoProbe,
};
use vidtrack_types::{
    Detection, FrameRecord, StatusLine, TrackingOutput, VideoMetadata, WorkerJobConfig,
};

/// Emits `[Progression]` lines whenever the integer percentage moves
struct ProgressReporter<'a> {
    total: u64,
    done: u64,
    last_percent: Option<u32>,
    out: &'a mut dyn Write,
}

impl<'a> ProgressReporter<'a> {
    fn new(total: u64, out: &'a mut dyn Write) -> Self {
        Self {
            total,
            done: 0,
            last_percent: None,
            out,
        }
    }

    fn advance(&mut self) -> Result<()> {
        self.done += 1;
        self.emit(false)
    }

    fn finish(&mut self) -> Result<()> {
        self.done = self.total;
        self.emit(true)
    }

    fn emit(&mut self, force: bool) -> Result<()> {
        let line = StatusLine::progress(self.done, self.total);
        let StatusLine::Progress { percent, .. } = line else {
            return Ok(());
        };
        if force || self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            writeln!(self.out, "{}", line)?;
            self.out.flush()?;
        }
        Ok(())
    }
}

/// Run one job end-to-end and write its output file
pub fn run_job(
    job: &WorkerJobConfig,
    engine: &dyn DetectionEngine,
    out: &mut dyn Write,
) -> Result<TrackingOutput> {
    let probe = engine
        .probe(&job.video_path)
        .with_context(|| format!("Failed to probe {}", job.video_path.display()))?;
    tracing::info!(
        "Pipeline: {} has {} frames at {:.2} fps",
        job.job_id,
        probe.total_frames,
        probe.fps
    );

    let mut progress = ProgressReporter::new(probe.total_frames, out);
    let detections = collect_detections(job, engine, probe.total_frames, &mut progress)?;
    let output = track_frames(job, probe, detections);

    output::write_atomic(&job.output_path, &output)?;
    progress.finish()?;
    Ok(output)
}

fn collect_detections(
    job: &WorkerJobConfig,
    engine: &dyn DetectionEngine,
    total: u64,
    progress: &mut ProgressReporter<'_>,
) -> Result<BTreeMap<u64, Vec<Detection>>> {
    let ranges = FrameRange::split(total, job.worker_count);
    let mut frames: BTreeMap<u64, Vec<Detection>> = BTreeMap::new();
    let video = job.video_path.as_path();

    thread::scope(|scope| -> Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded::<FrameDetections>();

        let mut handles = Vec::with_capacity(ranges.len());
        for range in ranges {
            let tx = tx.clone();
            let handle = scope.spawn(move || {
                let mut sink = |fd: FrameDetections| {
                    // Receiver outlives every range thread
                    let _ = tx.send(fd);
                };
                engine.detect_range(video, range, &mut sink)
            });
            handles.push((range, handle));
        }
        drop(tx);

        for fd in rx {
            let detections = match fd.outcome {
                FrameOutcome::Detections(detections) => detections,
                FrameOutcome::Unreadable(message) => {
                    let err = EngineError::FrameIngest {
                        frame: fd.frame,
                        message,
                    };
                    if fd.frame.saturating_add(job.frame_error_tolerance) > total {
                        tracing::debug!("Pipeline: {} near end of stream: {}", job.job_id, err);
                    } else {
                        tracing::warn!("Pipeline: {}: {}", job.job_id, err);
                    }
                    Vec::new()
                }
            };
            if frames.insert(fd.frame, detections).is_none() {
                progress.advance()?;
            } else {
                tracing::warn!(
                    "Pipeline: {} frame {} reported twice, keeping the last one",
                    job.job_id,
                    fd.frame
                );
            }
        }

        for (range, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    "Pipeline: {} frames {}..={} degraded to empty: {}",
                    job.job_id,
                    range.start,
                    range.end,
                    e
                ),
                Err(_) => tracing::error!(
                    "Pipeline: {} detection thread for {}..={} panicked",
                    job.job_id,
                    range.start,
                    range.end
                ),
            }
        }
        Ok(())
    })?;

    let received = frames.keys().filter(|f| **f >= 1 && **f <= total).count() as u64;
    if received < total {
        tracing::warn!(
            "Pipeline: {} missing detections for {} of {} frames",
            job.job_id,
            total - received,
            total
        );
    }
    Ok(frames)
}

fn build_classifier(job: &WorkerJobConfig) -> Option<SpeakingClassifier> {
    if !job.speaking.enhanced {
        return None;
    }

    let mut classifier = SpeakingClassifier::new(job.speaking);
    if let Some(path) = &job.audio_path {
        match AudioTimeline::load(path) {
            Ok(audio) => classifier = classifier.with_audio(audio),
            Err(e) => tracing::warn!("Pipeline: {} audio evidence unavailable: {:#}", job.job_id, e),
        }
    }
    if let Some(path) = &job.segments_path {
        match SegmentTimeline::load(path) {
            Ok(segments) => classifier = classifier.with_segments(segments),
            Err(e) => tracing::warn!("Pipeline: {} scene context unavailable: {:#}", job.job_id, e),
        }
    }
    Some(classifier)
}

/// Sequential tracking + speaking pass; one record per frame, always
fn track_frames(
    job: &WorkerJobConfig,
    probe: VideoProbe,
    mut detections: BTreeMap<u64, Vec<Detection>>,
) -> TrackingOutput {
    let mut tracker = CentroidTracker::new(job.tracker);
    let classifier = build_classifier(job);

    let mut frames = Vec::with_capacity(probe.total_frames as usize);
    for frame in 1..=probe.total_frames {
        let tracked = tracker.update(detections.remove(&frame).unwrap_or_default());

        let tracked_objects = tracked
            .iter()
            .map(|track| {
                let mut record = track.to_record();
                let det = &track.last_detection;
                let speaking = match &classifier {
                    Some(classifier) => {
                        Some(classifier.classify(frame, det.blendshapes.as_ref(), det.source))
                    }
                    None => jaw_heuristic(det, &job.speaking),
                };
                if let Some(result) = speaking {
                    record.set_speaking(&result);
                }
                record
            })
            .collect();

        frames.push(FrameRecord {
            frame,
            tracked_objects,
        });
    }

    if !detections.is_empty() {
        tracing::warn!(
            "Pipeline: {} ignored detections for {} frames outside 1..={}",
            job.job_id,
            detections.len(),
            probe.total_frames
        );
    }

    TrackingOutput {
        metadata: VideoMetadata {
            video_path: job.video_path.display().to_string(),
            total_frames: probe.total_frames,
            fps: probe.fps,
            tracking_engine: job.engine.as_str().to_string(),
        },
        frames,
    }
}
