//! Error types for the ViyaDB core engine

use thiserror::Error;

/// Result type alias for core engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for core engine operations.
///
/// Capacity errors (dictionary overflow, cardinality-guard overflow) are
/// deliberately absent: per the ingestion contract they are a silent data
/// outcome remapped to the `__exceeded` sentinel and accounted for in load
/// stats, never surfaced as an `Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid schema: illegal name, unsupported type, missing required field
    #[error("config error: {0}")]
    Config(String),

    /// Unknown table, column, or metric referenced by a query
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Malformed row or filter value
    #[error("parse error: {0}")]
    Parse(String),

    /// File not accessible, read failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreachable invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a lookup error
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error kind is recoverable by the caller (retryable),
    /// as opposed to one that reflects a permanent mistake in the request.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Config(_) | Error::Lookup(_) | Error::Parse(_) | Error::Internal(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("bad schema");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "config error: bad schema");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).is_recoverable());
        assert!(!Error::lookup("no such table").is_recoverable());
    }
}
