// Strong typing over strings. Newtypes for media timestamps, frame numbers, and pixel geometry.
// Boxes cross the JS boundary as plain arrays; everything else as snake_case objects.

use serde::{Deserialize, Serialize};

/// Media-clock timestamp in microseconds. Newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_micros(us: u64) -> Self {
        Timestamp(us)
    }

    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms.saturating_mul(1000))
    }

    /// Convert fractional milliseconds (as reported by `HTMLMediaElement`) to a timestamp.
    /// Negative and non-finite inputs clamp to zero.
    pub fn from_millis_f64(ms: f64) -> Self {
        if ms.is_finite() && ms > 0.0 {
            Timestamp((ms * 1000.0).round() as u64)
        } else {
            Timestamp(0)
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_millis_f64(secs * 1000.0)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn as_secs(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn saturating_sub_millis(&self, ms: f64) -> Self {
        let us = Self::from_millis_f64(ms).as_micros();
        Timestamp(self.0.saturating_sub(us))
    }

    /// Signed difference `self - other` in milliseconds.
    pub fn millis_since(&self, other: Timestamp) -> f64 {
        (self.0 as f64 - other.0 as f64) / 1000.0
    }
}

/// Metadata frame number. Newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub fn new(number: u64) -> Self {
        FrameNumber(number)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Axis-aligned bounding box `[x1, y1, x2, y2]` in some pixel space.
///
/// This is the single canonical box shape; alternate wire shapes are
/// normalized into it by [`crate::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        BBox { x1, y1, x2, y2 }
    }

    pub fn from_array(coords: [f64; 4]) -> Self {
        BBox::new(coords[0], coords[1], coords[2], coords[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Finite coordinates with `x2 >= x1` and `y2 >= y1`.
    pub fn is_well_formed(&self) -> bool {
        self.is_finite() && self.x2 >= self.x1 && self.y2 >= self.y1
    }
}

impl From<[f64; 4]> for BBox {
    fn from(coords: [f64; 4]) -> Self {
        BBox::from_array(coords)
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        bbox.to_array()
    }
}

/// Pixel resolution `[width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Resolution {
    pub width: f64,
    pub height: f64,
}

impl Resolution {
    pub fn new(width: f64, height: f64) -> Self {
        Resolution { width, height }
    }

    pub fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl From<[f64; 2]> for Resolution {
    fn from(dims: [f64; 2]) -> Self {
        Resolution::new(dims[0], dims[1])
    }
}

impl From<Resolution> for [f64; 2] {
    fn from(res: Resolution) -> Self {
        [res.width, res.height]
    }
}

/// Point in pixel space (overlay anchor).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from(p: [f64; 2]) -> Self {
        Point::new(p[0], p[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Geographic position of a detected object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

/// Vehicle telemetry attached to a metadata frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Telemetry {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
    pub roll: f64,
    pub pitch: f64,
}

/// A classified object instance reported for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f64, // 0.0-1.0
    #[serde(default)]
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub track_id: Option<u64>,
    #[serde(default)]
    pub geo_coordinates: Option<GeoCoordinates>,
}

/// One timestamped unit of metadata: telemetry plus zero or more detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFrame {
    pub frame_number: FrameNumber,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// How well metadata timing currently tracks video playback timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Synchronization disabled or no element attached.
    #[default]
    Idle,
    /// Enabled, but no usable metadata yet (or reconnecting after a stream error).
    Waiting,
    /// A frame within tolerance of the playback clock is applied.
    Synced,
    /// Metadata is only available ahead of playback.
    Buffering,
    /// Metadata lags the playback clock beyond tolerance.
    Behind,
}

/// Read-only view of the synchronization state for the overlay renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncState {
    pub current_frame: Option<FrameNumber>,
    pub latency_ms: f64,
    pub buffer_size: usize,
    pub metadata_rate: f64,
    pub sync_offset_ms: f64,
    pub sync_status: SyncStatus,
    pub detections: Vec<Detection>,
    pub detection_count: usize,
    pub telemetry: Option<Telemetry>,
    /// Frames discarded because they arrived at or before the applied frame.
    pub dropped_frames: u64,
    /// Detections skipped at ingestion because they were malformed.
    pub skipped_detections: u64,
}
