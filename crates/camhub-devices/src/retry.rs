//! Capture attempt classification and backoff.

use std::time::Duration;

use camhub_core::{CameraError, ErrorKind, Frame, Result};

/// Outcome of one driver capture attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A frame was acquired
    Frame(Frame),
    /// Failure worth another attempt after a backoff
    Retryable(CameraError),
    /// Failure that must propagate immediately
    Fatal(CameraError),
}

impl AttemptOutcome {
    /// Classify a raw driver result.
    ///
    /// `Ok(None)` ("no frame yet") is a Capture-kind failure.
    pub fn classify(result: Result<Option<Frame>>) -> Self {
        match result {
            Ok(Some(frame)) => Self::Frame(frame),
            Ok(None) => Self::Retryable(CameraError::Capture(
                "Driver returned no frame".to_string(),
            )),
            Err(e) if e.is_retryable() => Self::Retryable(e),
            Err(e) => Self::Fatal(e),
        }
    }
}

/// Delay before attempt `attempt + 1` after attempt `attempt` (0-based) failed
/// with `kind`: the kind's base doubled per attempt, no jitter, no cap.
pub fn backoff_delay(kind: ErrorKind, attempt: u32) -> Option<Duration> {
    let base = kind.backoff_base()?;
    Some(base * 2u32.saturating_pow(attempt))
}
