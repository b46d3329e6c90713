//! Validation of raw engine detections

use crate::engines::EngineCapabilities;
use crate::error::EngineError;
use vidtrack_types::{BBox, Detection, EngineKind, Point2, Point3, RawDetection};

/// Turn a raw engine detection into a `Detection`.
///
/// A bbox is required. When the engine omits the centroid it is derived from
/// the bbox center.
pub fn parse_detection(
    raw: RawDetection,
    source: EngineKind,
    frame: u64,
) -> Result<Detection, EngineError> {
    let malformed = |message: &str| EngineError::DetectionParse {
        frame,
        message: message.to_string(),
    };

    let [x, y, w, h] = raw.bbox.ok_or_else(|| malformed("missing bbox"))?;
    let bbox = BBox::new(x, y, w, h);
    if !bbox.is_valid() {
        return Err(malformed("bbox must be finite with non-negative size"));
    }

    let centroid = match raw.centroid {
        Some([cx, cy]) => Point2::new(cx, cy),
        None => bbox.center(),
    };
    if !centroid.is_finite() {
        return Err(malformed("centroid is not finite"));
    }

    let label = raw
        .label
        .filter(|label| !label.trim().is_empty())
        .unwrap_or_else(|| source.spec().default_label.to_string());

    Ok(Detection {
        bbox,
        centroid,
        source,
        label,
        confidence: raw.confidence.filter(|c| c.is_finite()),
        blendshapes: raw.blendshapes,
        landmarks: raw.landmarks.map(|points| {
            points
                .into_iter()
                .map(|[x, y, z]| Point3 { x, y, z })
                .collect()
        }),
        model_coeffs: raw.model_coeffs,
    })
}

/// Parse every detection of a frame, discarding (and logging) malformed ones
pub fn parse_frame_detections(
    raws: Vec<RawDetection>,
    source: EngineKind,
    frame: u64,
) -> Vec<Detection> {
    let mut detections = Vec::with_capacity(raws.len());
    for raw in raws {
        match parse_detection(raw, source, frame) {
            Ok(detection) => detections.push(detection),
            Err(e) => tracing::warn!("Detection: {} discarded: {}", source, e),
        }
    }
    detections
}
