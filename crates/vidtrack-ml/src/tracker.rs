//! Centroid tracker
//!
//! Associates each frame's detections with the tracks of the previous frames
//! by centroid distance and manages track lifetimes.
//!
//! Per `update` call:
//! 1. every active track ages by one frame;
//! 2. each detection looks up its nearest active track, and all
//!    `(distance, track, detection)` candidates are sorted globally by distance;
//! 3. candidates within `distance_threshold` are accepted in that order as
//!    long as neither side is already claimed, which resets the track's age;
//! 4. unclaimed detections open new tracks with fresh IDs;
//! 5. tracks unseen for more than `deregister_threshold` frames are dropped;
//! 6. tracks seen this frame are returned ordered by centroid x.
//!
//! Track state is frame-order dependent: `update` must be called once per
//! frame, in ascending frame order, from a single thread.

use vidtrack_types::{BBox, Detection, Point2, TrackedObjectRecord, TrackerConfig};

/// An entity followed across frames
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    /// Monotonically increasing within one tracker, never reused
    pub id: u64,
    pub centroid: Point2,
    pub bbox: BBox,
    /// Consecutive frames without a matching detection
    pub frames_unseen: u32,
    pub last_detection: Detection,
}

impl TrackedObject {
    fn from_detection(id: u64, detection: Detection) -> Self {
        Self {
            id,
            centroid: detection.centroid,
            bbox: detection.bbox,
            frames_unseen: 0,
            last_detection: detection,
        }
    }

    fn absorb(&mut self, detection: Detection) {
        self.centroid = detection.centroid;
        self.bbox = detection.bbox;
        self.frames_unseen = 0;
        self.last_detection = detection;
    }

    /// Output record, without speaking fields
    pub fn to_record(&self) -> TrackedObjectRecord {
        let det = &self.last_detection;
        TrackedObjectRecord {
            id: self.id.to_string(),
            centroid_x: self.centroid.x,
            centroid_y: self.centroid.y,
            bbox_xmin: self.bbox.x,
            bbox_xmax: self.bbox.x_max(),
            bbox_ymin: self.bbox.y,
            bbox_ymax: self.bbox.y_max(),
            bbox_width: self.bbox.w,
            bbox_height: self.bbox.h,
            source: det.source,
            label: det.label.clone(),
            confidence: det.confidence,
            blendshapes: det.blendshapes.clone(),
            is_speaking: None,
            speaking_confidence: None,
            speaking_method: None,
        }
    }
}

/// Nearest-neighbour lookup over track centroids.
///
/// Track counts per frame are small (faces and people on screen), so a flat
/// scan beats building a tree every frame.
struct CentroidIndex {
    points: Vec<Point2>,
}

impl CentroidIndex {
    fn new(tracks: &[TrackedObject]) -> Self {
        Self {
            points: tracks.iter().map(|t| t.centroid).collect(),
        }
    }

    /// Index and distance of the closest point; ties go to the lowest index
    fn nearest(&self, query: &Point2) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, point) in self.points.iter().enumerate() {
            let distance = point.distance(query);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((idx, distance)),
            }
        }
        best
    }
}

struct Candidate {
    distance: f64,
    track: usize,
    detection: usize,
}

pub struct CentroidTracker {
    config: TrackerConfig,
    tracks: Vec<TrackedObject>,
    next_id: u64,
    /// `(track id, detection index)` pairs accepted by the last update
    last_matches: Vec<(u64, usize)>,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            last_matches: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tracks currently alive, including ones unseen in the last frames
    pub fn active_tracks(&self) -> &[TrackedObject] {
        &self.tracks
    }

    /// Matches made by the most recent `update`, as `(track id, detection index)`
    pub fn last_matches(&self) -> &[(u64, usize)] {
        &self.last_matches
    }

    /// ID the next new track will receive
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Advance the tracker by one frame
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedObject> {
        self.last_matches.clear();

        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|det| {
                let valid = det.is_valid();
                if !valid {
                    tracing::warn!(
                        "Tracker: discarding {} detection with invalid geometry {:?}",
                        det.source,
                        det.bbox
                    );
                }
                valid
            })
            .collect();

        for track in &mut self.tracks {
            track.frames_unseen = track.frames_unseen.saturating_add(1);
        }

        let mut claimed = vec![false; detections.len()];

        if !self.tracks.is_empty() && !detections.is_empty() {
            let index = CentroidIndex::new(&self.tracks);
            let mut candidates: Vec<Candidate> = detections
                .iter()
                .enumerate()
                .filter_map(|(det_idx, det)| {
                    index.nearest(&det.centroid).map(|(track, distance)| Candidate {
                        distance,
                        track,
                        detection: det_idx,
                    })
                })
                .collect();

            // Stable: equal distances keep detection order
            candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));

            let mut track_taken = vec![false; self.tracks.len()];
            for cand in candidates {
                if cand.distance > self.config.distance_threshold {
                    break;
                }
                if track_taken[cand.track] || claimed[cand.detection] {
                    continue;
                }
                track_taken[cand.track] = true;
                claimed[cand.detection] = true;

                let track = &mut self.tracks[cand.track];
                track.absorb(detections[cand.detection].clone());
                self.last_matches.push((track.id, cand.detection));
            }
        }

        for (det_idx, detection) in detections.into_iter().enumerate() {
            if claimed[det_idx] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            tracing::debug!("Tracker: registered track {} ({})", id, detection.label);
            self.tracks.push(TrackedObject::from_detection(id, detection));
        }

        let threshold = self.config.deregister_threshold;
        self.tracks.retain(|track| {
            let keep = track.frames_unseen <= threshold;
            if !keep {
                tracing::debug!(
                    "Tracker: deregistered track {} after {} unseen frames",
                    track.id,
                    track.frames_unseen
                );
            }
            keep
        });

        let mut visible: Vec<TrackedObject> = self
            .tracks
            .iter()
            .filter(|track| track.frames_unseen == 0)
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.centroid.x.total_cmp(&b.centroid.x));
        visible
    }
}
