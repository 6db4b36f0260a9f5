//! Error types for guardian-types.

use thiserror::Error;

/// Errors raised while parsing wire identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Device identifier is empty or too long.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    /// Blob identifier is not a canonical UUID.
    #[error("invalid blob id: {0}")]
    InvalidBlobId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::InvalidBlobId("../etc/passwd".into());
        assert_eq!(err.to_string(), "invalid blob id: ../etc/passwd");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
