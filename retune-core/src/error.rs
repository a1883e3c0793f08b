//! Error types for analysis, retuning and encoding

use thiserror::Error;

/// Errors raised by the retune engine.
///
/// Inconclusive analysis (silence, noise) is never an error; it comes back
/// as a low-confidence [`DetectionResult`](crate::pitch::DetectionResult).
#[derive(Error, Debug)]
pub enum RetuneError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Audio buffer has no channels")]
    EmptyBuffer,

    #[error("Analysis window is empty (frames {start}..{end})")]
    EmptyWindow { start: usize, end: usize },

    #[error("Channel {channel} has {actual} frames, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid frequency for {name}: {value} Hz")]
    InvalidFrequency { name: &'static str, value: f64 },

    #[error("Retune failed: {0}")]
    RenderFailed(String),

    #[error("Audio would take {bytes} bytes, too large to render or encode")]
    TooLarge { bytes: u64 },

    #[error("Render worker is no longer running")]
    WorkerDisconnected,
}

/// Result type for retune operations
pub type RetuneResult<T> = Result<T, RetuneError>;

/// Rejects zero, negative and non-finite frequencies.
pub(crate) fn ensure_positive_hz(name: &'static str, value: f64) -> RetuneResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(RetuneError::InvalidFrequency { name, value })
    }
}
