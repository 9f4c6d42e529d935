//! Error classification for the ingestion and catalog core.
//!
//! Every fallible operation returns [`CoreError`]. The request layer decides
//! how each [`ErrorKind`] is presented; the core only classifies.

use std::fmt;

/// Boxed source error carried by [`CoreError::StorageFailure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    StorageFailure,
    ConsistencyViolation,
}

impl ErrorKind {
    /// True for kinds caused by the caller's request rather than the service.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::InvalidInput
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::StorageFailure => "storage failure",
            ErrorKind::ConsistencyViolation => "consistency violation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A referenced owner, album, image or blob does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate account, duplicate album-image link, or a stale write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Empty or malformed payload, non-positive id, empty name.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Object-store or relational-store I/O failed, including timeouts.
    #[error("storage failure: {context}: {source}")]
    StorageFailure {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A catalog row references data missing from its backing store.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl CoreError {
    pub fn not_found(message: impl Into<String>) -> Self {
        CoreError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CoreError::InvalidInput(message.into())
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        CoreError::ConsistencyViolation(message.into())
    }

    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CoreError::StorageFailure {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Storage failure raised when an I/O deadline elapses.
    pub fn timeout(context: impl Into<String>) -> Self {
        CoreError::storage(context, DeadlineExceeded)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::StorageFailure { .. } => ErrorKind::StorageFailure,
            CoreError::ConsistencyViolation(_) => ErrorKind::ConsistencyViolation,
        }
    }

    /// True when this failure was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            CoreError::StorageFailure { source, .. } => source.is::<DeadlineExceeded>(),
            _ => false,
        }
    }

    /// Prefix the message with the failing operation and its owner/image context.
    pub fn context(self, context: impl fmt::Display) -> Self {
        match self {
            CoreError::NotFound(m) => CoreError::NotFound(format!("{context}: {m}")),
            CoreError::Conflict(m) => CoreError::Conflict(format!("{context}: {m}")),
            CoreError::InvalidInput(m) => CoreError::InvalidInput(format!("{context}: {m}")),
            CoreError::StorageFailure { context: inner, source } => CoreError::StorageFailure {
                context: format!("{context}: {inner}"),
                source,
            },
            CoreError::ConsistencyViolation(m) => {
                CoreError::ConsistencyViolation(format!("{context}: {m}"))
            }
        }
    }
}

/// Source error for deadline expiry.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::storage("io", err)
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::storage("sqlite", err)
    }
}

#[cfg(feature = "postgres")]
impl From<postgres::Error> for CoreError {
    fn from(err: postgres::Error) -> Self {
        CoreError::storage("postgres", err)
    }
}

#[cfg(feature = "postgres")]
impl From<r2d2::Error> for CoreError {
    fn from(err: r2d2::Error) -> Self {
        CoreError::storage("postgres pool", err)
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::storage("blocking task", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(ErrorKind::NotFound.is_client_error());
        assert!(ErrorKind::Conflict.is_client_error());
        assert!(ErrorKind::InvalidInput.is_client_error());
        assert!(!ErrorKind::StorageFailure.is_client_error());
        assert!(!ErrorKind::ConsistencyViolation.is_client_error());
    }

    #[test]
    fn test_context_keeps_kind() {
        let err = CoreError::not_found("image 7").context("fetch_image(owner=alice)");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "not found: fetch_image(owner=alice): image 7");

        let err = CoreError::timeout("put").context("ingest");
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("storage failure: ingest: put"));
    }

    #[test]
    fn test_io_error_is_storage_failure() {
        let err: CoreError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(!err.is_timeout());
    }
}
