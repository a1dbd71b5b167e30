// Typed errors with thiserror. Surface meaningful messages to JS.
// Only configuration and ingestion problems are errors; stream trouble is reported through SyncStatus.

use thiserror::Error;

/// Overlay core error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    #[error("Invalid {which} resolution {width}x{height}: dimensions must be positive")]
    InvalidResolution {
        which: &'static str,
        width: f64,
        height: f64,
    },

    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed metadata frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed detection {index} in frame {frame_number}: {reason}")]
    MalformedDetection {
        frame_number: u64,
        index: usize,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Shorthand for results carrying an [`OverlayError`].
pub type Result<T> = std::result::Result<T, OverlayError>;

impl From<serde_json::Error> for OverlayError {
    fn from(err: serde_json::Error) -> Self {
        OverlayError::Serialization(err.to_string())
    }
}
