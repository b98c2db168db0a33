// Core types for viewport capture

use chrono::{DateTime, Utc};

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Error types for snapshot operations
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The capture primitive reported a failure
    #[error("Capture error: {0}")]
    Capture(String),

    /// The capture primitive did not answer in time
    #[error("Capture timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Image bytes could not be decoded or encoded
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Data URL was malformed
    #[error("Invalid data URL: {0}")]
    DataUrl(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded viewport capture
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// PNG-encoded image data
    pub png: Vec<u8>,
    /// Width in device pixels
    pub width: u32,
    /// Height in device pixels
    pub height: u32,
    /// When the primitive returned
    pub taken_at: DateTime<Utc>,
}

impl CapturedFrame {
    pub fn new(png: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            png,
            width,
            height,
            taken_at: Utc::now(),
        }
    }
}
