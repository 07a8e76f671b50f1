//! Stage error taxonomy.
//!
//! Every stage body returns `Result<StageOutcome, StageError>`. The worker
//! loop maps the error variant onto ledger state: transient errors retry
//! with backoff, deterministic ones mark the row skipped so dependents do
//! not block, and a cancellation leaves the row pending for the next run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    /// File temporarily unreadable, disk full, endpoint timeout. Retried.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Corrupt or unsupported image data. Never retried.
    #[error("unreadable image: {0}")]
    PermanentDecode(String),

    /// A declared input is absent (e.g. geocoding without GPS). Silent skip.
    #[error("missing precondition: {0}")]
    MissingPrecondition(&'static str),

    /// External endpoint configured empty or repeatedly unreachable.
    #[error("external service disabled or unreachable")]
    ExternalDisabled,

    /// User-initiated stop observed mid-stage.
    #[error("cancelled")]
    Cancelled,

    /// Catalog unavailable or similar. Surfaces as a failed row and a log.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StageError {
    /// Stable code stored in the ledger's error column.
    pub fn code(&self) -> &'static str {
        match self {
            StageError::TransientIo(_) => "transient_io",
            StageError::PermanentDecode(_) => "decode",
            StageError::MissingPrecondition(_) => "precondition",
            StageError::ExternalDisabled => "external_disabled",
            StageError::Cancelled => "cancelled",
            StageError::Fatal(_) => "fatal",
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::TransientIo(e.to_string())
    }
}

impl From<image::ImageError> for StageError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => StageError::TransientIo(io.to_string()),
            other => StageError::PermanentDecode(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StageError {
    fn from(e: rusqlite::Error) -> Self {
        StageError::Fatal(format!("catalog: {e}"))
    }
}

impl From<anyhow::Error> for StageError {
    fn from(e: anyhow::Error) -> Self {
        StageError::Fatal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(StageError::TransientIo(String::new()).code(), "transient_io");
        assert_eq!(StageError::ExternalDisabled.code(), "external_disabled");
        assert_eq!(StageError::Cancelled.code(), "cancelled");
    }

    #[test]
    fn test_io_error_is_transient() {
        let err: StageError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, StageError::TransientIo(_)));
    }
}
