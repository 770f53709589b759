//! Error types for RoughDb.

use std::io;

/// The result type used throughout RoughDb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for rough filter operations.
///
/// Variants fall into three groups:
/// - programming-error faults (`AlreadyStarted`, `AlreadyBuilt`, `InvalidState`,
///   `NoDataToSerialize`): the caller broke the filter's lifecycle contract and the
///   error must be propagated, never swallowed;
/// - data errors (`Corruption`, `MissingOrCorrupt`, `ChecksumMismatch`): untrusted
///   persisted state, handled by falling back to "no filter installed";
/// - environment errors (`Io`, `Serialization`, `InvalidArgument`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A binary record failed framing or content validation.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A checkpoint JSON field group is missing or cannot be trusted.
    #[error("Missing or corrupt checkpoint data: {0}")]
    MissingOrCorrupt(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// A build was already claimed for this filter.
    #[error("Build already started at timestamp {build_time}")]
    AlreadyStarted {
        /// Timestamp recorded by the first, successful claim.
        build_time: u64,
    },

    /// The filter already has summaries installed.
    #[error("Filter already built")]
    AlreadyBuilt,

    /// Serialization was requested for a filter that has not been built.
    #[error("No rough filter data to serialize")]
    NoDataToSerialize,

    /// The filter is in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A JSON serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new missing-or-corrupt checkpoint error.
    pub fn missing_or_corrupt(msg: impl Into<String>) -> Self {
        Error::MissingOrCorrupt(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true for errors caused by untrusted persisted data.
    ///
    /// These are recoverable: the affected block simply loses its filter.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::MissingOrCorrupt(_) | Error::ChecksumMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("test corruption");
        assert_eq!(err.to_string(), "Data corruption: test corruption");

        let err = Error::ChecksumMismatch {
            expected: 0x12345678,
            actual: 0x87654321,
        };
        assert!(err.to_string().contains("0x12345678"));
        assert!(err.to_string().contains("0x87654321"));

        let err = Error::AlreadyStarted { build_time: 42 };
        assert_eq!(err.to_string(), "Build already started at timestamp 42");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_data_error_classification() {
        assert!(Error::corruption("x").is_data_error());
        assert!(Error::missing_or_corrupt("x").is_data_error());
        assert!(!Error::AlreadyBuilt.is_data_error());
        assert!(!Error::NoDataToSerialize.is_data_error());
    }
}
