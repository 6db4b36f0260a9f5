//! Error types for guardian-relay.

use guardian_types::BlobId;
use std::path::PathBuf;

/// Main error type for relay operations.
///
/// `Unauthorized`, `NotFound` and `TooLarge` are expected outcomes that are
/// reported to the caller as-is. `Infrastructure` hides its details from the
/// caller and is logged instead.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Missing, malformed or expired token, or bad device credentials.
    #[error("could not validate credentials")]
    Unauthorized,

    /// Blob id unknown or already consumed.
    #[error("file not found")]
    NotFound,

    /// Upload exceeded the size limit.
    #[error("file too large (limit: {limit} bytes)")]
    TooLarge {
        /// Maximum allowed size.
        limit: u64,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// Request was well-formed at the transport level but not usable.
    #[error("bad request: {reason}")]
    BadRequest {
        /// What was wrong with it.
        reason: String,
    },

    /// Storage medium failure.
    #[error("storage error: {0}")]
    Infrastructure(#[source] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Unexpected failure outside storage (e.g. token signing).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for RelayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::BlobNotFound { .. } => RelayError::NotFound,
            StorageError::BlobTooLarge { limit } => RelayError::TooLarge { limit },
            // The client's body failed, not the storage medium
            StorageError::UploadAborted(e) => RelayError::BadRequest {
                reason: format!("upload interrupted: {e}"),
            },
            other => RelayError::Infrastructure(other),
        }
    }
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error while handling a blob.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Blob not found (never stored, or already consumed).
    #[error("blob not found: {blob_id}")]
    BlobNotFound {
        /// The blob ID that was not found.
        blob_id: BlobId,
    },

    /// Blob exceeded the upload limit.
    #[error("blob too large (limit: {limit} bytes)")]
    BlobTooLarge {
        /// Maximum allowed size.
        limit: u64,
    },

    /// The upload stream failed before completion.
    #[error("upload aborted: {0}")]
    UploadAborted(#[source] std::io::Error),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
