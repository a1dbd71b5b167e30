// Overlay render contract: one positioned, labelled tag per current detection.

use serde::{Deserialize, Serialize};

use crate::bbox::{validate_resolution, BBoxUtil};
use crate::error::Result;
use crate::types::*;

/// Everything the presentation layer needs to draw one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayTag {
    /// Anchor in element pixels.
    pub anchor: Point,
    /// Box in element pixels.
    pub bbox: BBox,
    pub label: String,
    pub class_name: String,
    pub confidence: f64,
    pub track_id: Option<u64>,
}

/// `"vehicle 87% #12"`
pub fn label_for(detection: &Detection) -> String {
    let mut label = format!(
        "{} {:.0}%",
        detection.class_name,
        detection.confidence * 100.0
    );
    if let Some(track_id) = detection.track_id {
        label.push_str(&format!(" #{track_id}"));
    }
    label
}

/// Map detections onto the rendered element.
///
/// Detections without a usable box are left out; bad resolutions are a configuration error.
pub fn build_overlay(
    detections: &[Detection],
    stream_resolution: Resolution,
    element_size: Resolution,
) -> Result<Vec<OverlayTag>> {
    validate_resolution("stream", stream_resolution)?;
    validate_resolution("video element", element_size)?;

    let mut tags = Vec::with_capacity(detections.len());
    for detection in detections {
        let Some(bbox) = detection.bbox else {
            continue;
        };
        let util = match BBoxUtil::new(bbox, stream_resolution, element_size) {
            Ok(util) => util,
            Err(err) => {
                tracing::warn!(error = %err, class = %detection.class_name, "skipping overlay tag");
                continue;
            }
        };
        tags.push(OverlayTag {
            anchor: util.center_point(),
            bbox: util.rescaled_bbox(),
            label: label_for(detection),
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
            track_id: detection.track_id,
        });
    }
    Ok(tags)
}
