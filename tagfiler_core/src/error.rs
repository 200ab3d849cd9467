//! Error types for tagfiler_core.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using tagfiler_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The index lock could not be claimed in time. Callers may retry.
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// The persisted index could not be decoded.
    #[error("Corrupted index at {path}: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    /// No index has been written to the store yet.
    #[error("Index not found at {path}")]
    IndexMissing { path: PathBuf },

    /// A fingerprint has no blob or no metadata record.
    #[error("Blob not found: {fingerprint}")]
    NotFound { fingerprint: String },

    /// A metadata record could not be decoded.
    #[error("Corrupted metadata at {path}: {reason}")]
    CorruptMetadata { path: PathBuf, reason: String },

    /// Invalid fingerprint format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// Store is invalid or its config cannot be used.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// A reader failed to derive content.
    #[error("Reader '{id}' failed: {reason}")]
    Reader { id: String, reason: String },
}

impl Error {
    /// Create a LockTimeout error.
    pub fn lock_timeout(path: impl Into<PathBuf>, waited: Duration) -> Self {
        Error::LockTimeout {
            path: path.into(),
            waited,
        }
    }

    /// Create an IndexCorrupt error.
    pub fn index_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an IndexMissing error.
    pub fn index_missing(path: impl Into<PathBuf>) -> Self {
        Error::IndexMissing { path: path.into() }
    }

    /// Create a NotFound error.
    pub fn not_found(fingerprint: impl Into<String>) -> Self {
        Error::NotFound {
            fingerprint: fingerprint.into(),
        }
    }

    /// Create a CorruptMetadata error.
    pub fn corrupt_metadata(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptMetadata {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create a Reader error.
    pub fn reader(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Reader {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failed operation can simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_is_retryable() {
        let err = Error::lock_timeout("/store/lock", Duration::from_millis(200));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("/store/lock"));
    }

    #[test]
    fn test_other_errors_not_retryable() {
        assert!(!Error::not_found("abcd").is_retryable());
        assert!(!Error::index_corrupt("/store/index.json", "bad").is_retryable());
    }
}
