// Normalization of raw metadata records into typed frames.
// Bad detections are skipped one at a time; only a broken frame envelope rejects the record.

use serde_json::{Map, Value};

use crate::error::{OverlayError, Result};
use crate::types::*;

/// A normalized frame plus how many of its detections were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedFrame {
    pub frame: MetadataFrame,
    pub skipped: usize,
}

/// Result of normalizing a batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestedBatch {
    pub frames: Vec<IngestedFrame>,
    /// Records rejected as a whole (bad envelope).
    pub rejected: usize,
}

impl IngestedBatch {
    pub fn skipped_detections(&self) -> usize {
        self.frames.iter().map(|f| f.skipped).sum()
    }
}

/// Parse a single wire record.
pub fn parse_frame(json: &str) -> Result<IngestedFrame> {
    let value: Value = serde_json::from_str(json)?;
    normalize_frame(&value)
}

/// Parse either one record or an array of records.
pub fn parse_batch(json: &str) -> Result<IngestedBatch> {
    let value: Value = serde_json::from_str(json)?;
    let records = match &value {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![other],
    };

    let mut batch = IngestedBatch::default();
    for record in records {
        match normalize_frame(record) {
            Ok(frame) => batch.frames.push(frame),
            Err(err) => {
                tracing::warn!(error = %err, "rejecting metadata record");
                batch.rejected += 1;
            }
        }
    }
    Ok(batch)
}

/// Normalize one record of the shape
/// `{ frame_number, timestamp_ms, telemetry, detections: [...] }`.
pub fn normalize_frame(value: &Value) -> Result<IngestedFrame> {
    let obj = value
        .as_object()
        .ok_or_else(|| OverlayError::MalformedFrame("record is not an object".to_string()))?;

    let frame_number = obj
        .get("frame_number")
        .and_then(as_non_negative_integer)
        .ok_or_else(|| OverlayError::MalformedFrame("missing or invalid frame_number".to_string()))?;

    let timestamp_ms = obj
        .get("timestamp_ms")
        .and_then(Value::as_f64)
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .ok_or_else(|| {
            OverlayError::MalformedFrame(format!(
                "frame {frame_number}: missing or invalid timestamp_ms"
            ))
        })?;

    let telemetry = match obj.get("telemetry") {
        None | Some(Value::Null) => None,
        Some(raw) => match normalize_telemetry(raw) {
            Ok(t) => Some(t),
            Err(reason) => {
                tracing::warn!(frame_number, %reason, "dropping malformed telemetry");
                None
            }
        },
    };

    let raw_detections = match obj.get("detections") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => {
            return Err(OverlayError::MalformedFrame(format!(
                "frame {frame_number}: detections is not an array"
            )))
        }
    };

    let mut detections = Vec::with_capacity(raw_detections.len());
    let mut skipped = 0;
    for (index, raw) in raw_detections.iter().enumerate() {
        match normalize_detection(raw, frame_number, index) {
            Ok(detection) => detections.push(detection),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed detection");
                skipped += 1;
            }
        }
    }

    Ok(IngestedFrame {
        frame: MetadataFrame {
            frame_number: FrameNumber::new(frame_number),
            timestamp: Timestamp::from_millis_f64(timestamp_ms),
            telemetry,
            detections,
        },
        skipped,
    })
}

/// Normalize one detection. The bbox is required for overlay use.
pub fn normalize_detection(value: &Value, frame_number: u64, index: usize) -> Result<Detection> {
    let malformed = |reason: String| OverlayError::MalformedDetection {
        frame_number,
        index,
        reason,
    };

    let obj = value
        .as_object()
        .ok_or_else(|| malformed("detection is not an object".to_string()))?;

    let class_id = obj
        .get("class_id")
        .and_then(as_non_negative_integer)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| malformed("missing or invalid class_id".to_string()))?;

    let class_name = obj
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing class_name".to_string()))?
        .to_string();

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite() && (0.0..=1.0).contains(c))
        .ok_or_else(|| malformed("confidence must be a number in [0, 1]".to_string()))?;

    let bbox = match obj.get("bbox") {
        None | Some(Value::Null) => return Err(malformed("missing bbox".to_string())),
        Some(raw) => normalize_bbox(raw).map_err(malformed)?,
    };

    let track_id = match obj.get("track_id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            as_non_negative_integer(raw).ok_or_else(|| malformed("invalid track_id".to_string()))?,
        ),
    };

    let geo_coordinates = match obj.get("geo_coordinates") {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let geo = normalize_geo(raw);
            if geo.is_none() {
                tracing::debug!(frame_number, index, "ignoring malformed geo_coordinates");
            }
            geo
        }
    };

    Ok(Detection {
        class_id,
        class_name,
        confidence,
        bbox: Some(bbox),
        track_id,
        geo_coordinates,
    })
}

/// Accepts `[x1, y1, x2, y2]`, `{x1, y1, x2, y2}` or `{x, y, width, height}`.
pub fn normalize_bbox(value: &Value) -> std::result::Result<BBox, String> {
    let bbox = match value {
        Value::Array(items) => {
            if items.len() != 4 {
                return Err(format!("bbox array has {} elements, expected 4", items.len()));
            }
            let mut coords = [0.0; 4];
            for (slot, item) in coords.iter_mut().zip(items) {
                *slot = item
                    .as_f64()
                    .ok_or_else(|| "bbox contains a non-numeric value".to_string())?;
            }
            BBox::from_array(coords)
        }
        Value::Object(obj) if obj.contains_key("x1") => BBox::new(
            number_field(obj, "x1")?,
            number_field(obj, "y1")?,
            number_field(obj, "x2")?,
            number_field(obj, "y2")?,
        ),
        Value::Object(obj) if obj.contains_key("width") => {
            let x = number_field(obj, "x")?;
            let y = number_field(obj, "y")?;
            BBox::new(
                x,
                y,
                x + number_field(obj, "width")?,
                y + number_field(obj, "height")?,
            )
        }
        Value::Object(_) => return Err("unrecognized bbox object shape".to_string()),
        _ => return Err("bbox is neither an array nor an object".to_string()),
    };

    if !bbox.is_finite() {
        return Err("bbox contains a non-finite value".to_string());
    }
    if !bbox.is_well_formed() {
        return Err(format!("bbox is inverted: {:?}", bbox.to_array()));
    }
    Ok(bbox)
}

fn normalize_telemetry(value: &Value) -> std::result::Result<Telemetry, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "telemetry is not an object".to_string())?;
    Ok(Telemetry {
        latitude: number_field(obj, "latitude")?,
        longitude: number_field(obj, "longitude")?,
        altitude: number_field(obj, "altitude")?,
        heading: number_field(obj, "heading")?,
        roll: number_field(obj, "roll")?,
        pitch: number_field(obj, "pitch")?,
    })
}

fn normalize_geo(value: &Value) -> Option<GeoCoordinates> {
    let obj = value.as_object()?;
    let latitude = number_field(obj, "latitude").ok()?;
    let longitude = number_field(obj, "longitude").ok()?;
    let altitude = number_field(obj, "altitude").ok();
    Some(GeoCoordinates {
        latitude,
        longitude,
        altitude,
    })
}

fn number_field(obj: &Map<String, Value>, key: &str) -> std::result::Result<f64, String> {
    obj.get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{key} is missing or not a finite number"))
}

/// Integers may arrive as `12` or `12.0` from JS.
fn as_non_negative_integer(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}
