use thiserror::Error;

/// Conditions that abort or reject a scan run.
///
/// Empty OCR output and failed sanity checks are deliberately absent: those
/// are ordinary values (`ValidationResult`, empty strings) carried inside the
/// scan result, not errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("navigation timeout: {0}")]
    NavigationTimeout(String),

    #[error("device {0} is busy")]
    LockContention(String),

    #[error("scan already running on {0}")]
    AlreadyRunning(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}
