//! Error taxonomy for camera operations.
//!
//! Every failure a driver or the orchestration layer can produce maps onto one
//! [`ErrorKind`]. The kind decides whether a session retries the operation and
//! how long it waits before the next attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classification of a camera failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Device or driver family absent
    NotFound,
    /// Device setup failed
    Initialization,
    /// Invalid parameter for the device
    Configuration,
    /// Device unreachable
    Connection,
    /// Frame acquisition failed
    Capture,
    /// Deadline exceeded
    Timeout,
    /// Anything else, typically a driver bug
    Unexpected,
}

impl ErrorKind {
    /// Whether a session retries an operation failing with this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Capture | Self::Timeout | Self::Unexpected
        )
    }

    /// Backoff before the second attempt; doubles on every further attempt.
    ///
    /// Returns `None` for kinds that are never retried.
    pub fn backoff_base(&self) -> Option<Duration> {
        match self {
            Self::Capture => Some(Duration::from_millis(100)),
            Self::Connection => Some(Duration::from_millis(500)),
            Self::Timeout => Some(Duration::from_millis(300)),
            Self::Unexpected => Some(Duration::from_millis(200)),
            Self::NotFound | Self::Initialization | Self::Configuration => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Initialization => "initialization",
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::Capture => "capture",
            Self::Timeout => "timeout",
            Self::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Device or family not found
    #[error("Camera not found: {0}")]
    NotFound(String),

    /// Device could not be initialized
    #[error("Camera initialization failed: {0}")]
    Initialization(String),

    /// Invalid configuration value
    #[error("Invalid camera configuration: {0}")]
    Configuration(String),

    /// Device unreachable or closed
    #[error("Camera connection error: {0}")]
    Connection(String),

    /// Frame acquisition failed
    #[error("Capture failed: {0}")]
    Capture(String),

    /// Operation timed out
    #[error("Camera operation timed out: {0}")]
    Timeout(String),

    /// Unclassified driver failure
    #[error("Unexpected camera error: {0}")]
    Unexpected(String),

    /// Unexpected failure that survived every retry
    #[error("Camera operation failed after {attempts} attempts: {message}")]
    Runtime { attempts: u32, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Build the variant matching `kind`.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Initialization => Self::Initialization(message),
            ErrorKind::Configuration => Self::Configuration(message),
            ErrorKind::Connection => Self::Connection(message),
            ErrorKind::Capture => Self::Capture(message),
            ErrorKind::Timeout => Self::Timeout(message),
            ErrorKind::Unexpected => Self::Unexpected(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Initialization(_) => ErrorKind::Initialization,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Capture(_) => ErrorKind::Capture,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unexpected(_) | Self::Runtime { .. } | Self::Io(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Message without the kind prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(m)
            | Self::Initialization(m)
            | Self::Configuration(m)
            | Self::Connection(m)
            | Self::Capture(m)
            | Self::Timeout(m)
            | Self::Unexpected(m) => m.clone(),
            Self::Runtime { message, .. } => message.clone(),
            Self::Io(e) => e.to_string(),
        }
    }

    /// Annotate the last error of a retry loop with the number of attempts.
    ///
    /// Unexpected failures are wrapped into [`CameraError::Runtime`] so callers
    /// can tell a driver bug from a known hardware failure.
    pub fn exhausted(self, attempts: u32) -> Self {
        match self.kind() {
            ErrorKind::Unexpected => Self::Runtime {
                attempts,
                message: self.message(),
            },
            kind => Self::from_kind(
                kind,
                format!("{} (failed after {} attempts)", self.message(), attempts),
            ),
        }
    }
}

/// Result type alias for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
