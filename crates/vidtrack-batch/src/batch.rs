//! Batch input and job construction

use crate::config::BatchConfig;
use crate::error::{SchedulerError, SchedulerResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use vidtrack_types::{EngineKind, Lane, WorkerJobConfig};

pub const SCENES_SUFFIX: &str = "scenes.json";
pub const AUDIO_SUFFIX: &str = "audio.json";

/// One video to process
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Video stem, suffixed when two videos share one
    pub id: String,
    pub video_path: PathBuf,
    pub engine: EngineKind,
    pub cpu_worker_count: usize,
    pub output_path: PathBuf,
    pub segments_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
}

impl Job {
    pub fn new(id: impl Into<String>, video_path: PathBuf, config: &BatchConfig) -> Self {
        let stem = video_stem(&video_path);
        let sibling = |suffix: &str| {
            let path = video_path.with_file_name(format!("{}.{}", stem, suffix));
            path.is_file().then_some(path)
        };

        Self {
            id: id.into(),
            output_path: video_path.with_file_name(format!("{}.json", stem)),
            segments_path: sibling(SCENES_SUFFIX),
            audio_path: sibling(AUDIO_SUFFIX),
            engine: config.engine,
            cpu_worker_count: config.cpu_worker_count,
            video_path,
        }
    }

    /// Resolved worker configuration for running this job on `lane`
    pub fn worker_config(&self, lane: Lane, config: &BatchConfig) -> WorkerJobConfig {
        let (use_gpu, worker_count) = match lane {
            Lane::Gpu => (true, 1),
            Lane::Cpu => (false, self.cpu_worker_count.max(1)),
        };
        WorkerJobConfig {
            job_id: self.id.clone(),
            video_path: self.video_path.clone(),
            output_path: self.output_path.clone(),
            engine: self.engine,
            engine_command: config.engine_command(self.engine),
            use_gpu,
            worker_count,
            tracker: config.tracker,
            speaking: config.speaking,
            segments_path: self.segments_path.clone(),
            audio_path: self.audio_path.clone(),
            frame_error_tolerance: config.frame_error_tolerance,
        }
    }
}

fn video_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

/// Parse batch file contents: one absolute path per line, `#` comments allowed
pub fn parse_batch(contents: &str) -> SchedulerResult<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut videos = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let path = PathBuf::from(line);
        if !path.is_absolute() {
            return Err(SchedulerError::BatchFile(format!(
                "line {}: '{}' is not an absolute path",
                index + 1,
                line
            )));
        }
        if seen.insert(path.clone()) {
            videos.push(path);
        } else {
            tracing::warn!("Batch: skipping duplicate entry {}", path.display());
        }
    }
    Ok(videos)
}

pub fn read_batch_file(path: &Path) -> SchedulerResult<Vec<PathBuf>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        SchedulerError::BatchFile(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_batch(&contents)
}

/// One job per video, ids unique within the batch
pub fn build_jobs(videos: Vec<PathBuf>, config: &BatchConfig) -> Vec<Job> {
    let mut used = HashSet::new();
    videos
        .into_iter()
        .map(|video| {
            let stem = video_stem(&video);
            let mut id = stem.clone();
            let mut n = 2;
            while !used.insert(id.clone()) {
                id = format!("{}-{}", stem, n);
                n += 1;
            }
            Job::new(id, video, config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch() {
        let videos = parse_batch(
            "# interviews\n/data/a.mp4\n\n   /data/b.mov  \n/data/a.mp4\n#/data/c.mp4\n",
        )
        .unwrap();
        assert_eq!(
            videos,
            vec![PathBuf::from("/data/a.mp4"), PathBuf::from("/data/b.mov")]
        );
    }

    #[test]
    fn test_relative_path_rejected() {
        let err = parse_batch("/data/a.mp4\nclips/b.mp4\n").unwrap_err();
        match err {
            SchedulerError::BatchFile(message) => assert!(message.starts_with("line 2")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_jobs_use_sibling_paths_and_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("talk.mp4");
        std::fs::create_dir(dir.path().join("other")).unwrap();
        let second = dir.path().join("other").join("talk.mp4");
        std::fs::write(dir.path().join("talk.audio.json"), r#"{"frames":[]}"#).unwrap();

        let cfg = BatchConfig {
            cpu_worker_count: 4,
            ..Default::default()
        };
        let jobs = build_jobs(vec![first.clone(), second], &cfg);

        assert_eq!(jobs[0].id, "talk");
        assert_eq!(jobs[1].id, "talk-2");
        assert_eq!(jobs[0].output_path, dir.path().join("talk.json"));
        assert_eq!(jobs[0].audio_path, Some(dir.path().join("talk.audio.json")));
        assert_eq!(jobs[0].segments_path, None);
        assert_eq!(jobs[1].audio_path, None);

        let gpu = jobs[0].worker_config(Lane::Gpu, &cfg);
        assert!(gpu.use_gpu);
        assert_eq!(gpu.worker_count, 1);
        let cpu = jobs[0].worker_config(Lane::Cpu, &cfg);
        assert!(!cpu.use_gpu);
        assert_eq!(cpu.worker_count, 4);
        assert_eq!(cpu.video_path, first);
        assert_eq!(cpu.frame_error_tolerance, 5);
    }
}
