/*!
 * Error types for orbit-catalog
 */

use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_NOT_FOUND: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Request never produced a response (connect, TLS, timeout, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Keyed lookup matched nothing
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Keyed lookup matched more than one item; the server broke key uniqueness
    #[error("Key lookup for '{key}' returned {matches} items, expected at most one")]
    DuplicateKey { key: String, matches: usize },

    /// Server declared a container with no registered dispatch entry
    #[error("No container dispatch registered for '{0}'")]
    UnknownContainer(String),

    /// Dispatch table registration rejected
    #[error("Invalid container dispatch entry '{tag}': {reason}")]
    InvalidDispatch { tag: String, reason: String },

    /// Block payload does not match the declared block shape and dtype
    #[error("Malformed block {block:?}: expected {expected} bytes, got {actual}")]
    MalformedBlock {
        block: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// Decoded block does not have the extents declared by the chunk grid
    #[error("Block {block:?} has shape {actual:?}, expected {expected:?}")]
    BlockShapeMismatch {
        block: Vec<usize>,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Indexer argument is neither a position nor a slice
    #[error("Invalid indexer: {0}")]
    InvalidIndexer(String),

    /// Positional index past the end of the catalog
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Path segments are malformed
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Response body parsed but did not have the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Dtype descriptor cannot be mapped to a concrete element type
    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CatalogError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::NotFound => EXIT_NOT_FOUND,
            ErrorCategory::Integrity | ErrorCategory::Protocol => EXIT_INTEGRITY,
            _ => EXIT_FATAL,
        }
    }

    /// Errors that indicate a broken contract rather than a condition a
    /// caller is expected to handle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CatalogError::DuplicateKey { .. }
                | CatalogError::MalformedBlock { .. }
                | CatalogError::BlockShapeMismatch { .. }
                | CatalogError::MalformedResponse(_)
                | CatalogError::UnknownContainer(_)
                | CatalogError::InvalidDispatch { .. }
                | CatalogError::Config(_)
        )
    }

    /// True for the "missing key" outcome of a lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::KeyNotFound(_))
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            CatalogError::Http { .. } | CatalogError::Transport(_) | CatalogError::Url(_) => {
                ErrorCategory::Network
            }
            CatalogError::KeyNotFound(_) => ErrorCategory::NotFound,
            CatalogError::DuplicateKey { .. }
            | CatalogError::MalformedResponse(_)
            | CatalogError::Decode(_) => ErrorCategory::Protocol,
            CatalogError::UnknownContainer(_)
            | CatalogError::InvalidDispatch { .. }
            | CatalogError::Config(_) => ErrorCategory::Configuration,
            CatalogError::MalformedBlock { .. }
            | CatalogError::BlockShapeMismatch { .. }
            | CatalogError::UnsupportedDtype(_) => ErrorCategory::Integrity,
            CatalogError::InvalidIndexer(_)
            | CatalogError::IndexOutOfRange { .. }
            | CatalogError::InvalidPath(_) => ErrorCategory::Input,
            CatalogError::Io(_) => ErrorCategory::IoError,
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        match (err.status(), err.url()) {
            (Some(status), Some(url)) => CatalogError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            },
            _ => CatalogError::Transport(err.to_string()),
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport and HTTP status failures
    Network,
    /// Missing keys
    NotFound,
    /// Server responses that break the wire contract
    Protocol,
    /// Caller-fixable setup problems (dispatch, config)
    Configuration,
    /// Byte payloads that do not match their declared layout
    Integrity,
    /// Bad arguments from the caller
    Input,
    /// Local I/O
    IoError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::NotFound => write!(f, "not-found"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::IoError => write!(f, "io"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_fatal() {
        let err = CatalogError::KeyNotFound("x".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(err.exit_code(), EXIT_NOT_FOUND);
    }

    #[test]
    fn test_duplicate_key_is_fatal() {
        let err = CatalogError::DuplicateKey {
            key: "x".to_string(),
            matches: 2,
        };
        assert!(err.is_fatal());
        assert!(!err.is_not_found());
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert_eq!(err.exit_code(), EXIT_INTEGRITY);
    }

    #[test]
    fn test_unknown_container_is_configuration() {
        let err = CatalogError::UnknownContainer("table".to_string());
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("table"));
    }

    #[test]
    fn test_malformed_block_message() {
        let err = CatalogError::MalformedBlock {
            block: vec![0, 1],
            expected: 32,
            actual: 3,
        };
        assert_eq!(err.category(), ErrorCategory::Integrity);
        assert_eq!(
            err.to_string(),
            "Malformed block [0, 1]: expected 32 bytes, got 3"
        );
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Network.to_string(), "network");
        assert_eq!(ErrorCategory::Input.to_string(), "input");
    }
}
