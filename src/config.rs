// Engine and synchronization settings passed from JS as JSON.
// Every field has a serde default so partial configs are accepted.

use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};
use crate::types::Resolution;

/// Engine configuration passed from JS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resolution the detections' boxes are expressed in.
    pub stream_resolution: Resolution,
    /// Rendered size of the video element; may be updated later.
    #[serde(default)]
    pub element_size: Option<Resolution>,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Metadata synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// A frame is selectable while `playback - tolerance <= ts <= playback` (milliseconds).
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: f64,
    /// Detections older than this many video milliseconds are withheld.
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: f64,
    /// A backward playback jump larger than this is treated as a seek.
    #[serde(default = "default_seek_threshold_ms")]
    pub seek_threshold_ms: f64,
    /// Upper bound on buffered frames; the oldest are dropped first.
    #[serde(default = "default_max_buffer_frames")]
    pub max_buffer_frames: usize,
    /// EMA weight for the metadata arrival rate (0 < alpha <= 1).
    #[serde(default = "default_rate_smoothing")]
    pub rate_smoothing: f64,
    /// First reconnect delay after a stream error (milliseconds).
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: f64,
    /// Reconnect delay cap (milliseconds).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: f64,
}

fn default_tolerance_ms() -> f64 {
    100.0
}

fn default_staleness_ms() -> f64 {
    2_000.0
}

fn default_seek_threshold_ms() -> f64 {
    1_000.0
}

fn default_max_buffer_frames() -> usize {
    300
}

fn default_rate_smoothing() -> f64 {
    0.3
}

fn default_backoff_initial_ms() -> f64 {
    500.0
}

fn default_backoff_max_ms() -> f64 {
    10_000.0
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            tolerance_ms: default_tolerance_ms(),
            staleness_ms: default_staleness_ms(),
            seek_threshold_ms: default_seek_threshold_ms(),
            max_buffer_frames: default_max_buffer_frames(),
            rate_smoothing: default_rate_smoothing(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("tolerance_ms", self.tolerance_ms),
            ("staleness_ms", self.staleness_ms),
            ("seek_threshold_ms", self.seek_threshold_ms),
            ("backoff_initial_ms", self.backoff_initial_ms),
            ("backoff_max_ms", self.backoff_max_ms),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(OverlayError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.max_buffer_frames == 0 {
            return Err(OverlayError::InvalidConfig(
                "max_buffer_frames must be at least 1".to_string(),
            ));
        }
        if !(self.rate_smoothing > 0.0 && self.rate_smoothing <= 1.0) {
            return Err(OverlayError::InvalidConfig(format!(
                "rate_smoothing must be in (0, 1], got {}",
                self.rate_smoothing
            )));
        }
        if self.staleness_ms < self.tolerance_ms {
            return Err(OverlayError::InvalidConfig(
                "staleness_ms must not be below tolerance_ms".to_string(),
            ));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(OverlayError::InvalidConfig(
                "backoff_max_ms must not be below backoff_initial_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.stream_resolution.is_positive() {
            return Err(OverlayError::InvalidResolution {
                which: "stream",
                width: self.stream_resolution.width,
                height: self.stream_resolution.height,
            });
        }
        self.sync.validate()
    }
}
