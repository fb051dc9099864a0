//! Error types for the focus monitor

use thiserror::Error;

/// Errors surfaced to callers of the monitor. Per-frame failures never end
/// up here; they degrade to sentinel labels inside the loop.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Failed to open camera: {0}")]
    CameraOpen(String),

    #[error("Frame source is not available")]
    SourceUnavailable,

    #[error("Failed to capture frame: {0}")]
    Capture(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Failed to spawn monitoring thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors from the five-point calibration run.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Frame source failed during calibration: {0}")]
    Source(#[from] MonitorError),

    #[error("No usable gaze samples collected for point '{0}'")]
    NoSamples(String),
}
