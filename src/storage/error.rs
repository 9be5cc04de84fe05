//! Error types for the blob storage layer

use std::fmt;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Locator could not be interpreted by any backend
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// Object or container not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage backend unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout occurred
    #[error("Timeout: operation took longer than {0:?}")]
    Timeout(std::time::Duration),

    /// Operation is not supported by the backend serving the locator
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic error wrapper
    #[error("Storage error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Create an invalid locator error
    pub fn invalid_locator<E: fmt::Display>(msg: E) -> Self {
        Self::InvalidLocator(msg.to_string())
    }

    /// Create a not found error
    pub fn not_found<E: fmt::Display>(item: E) -> Self {
        Self::NotFound(item.to_string())
    }

    /// Create an unavailable error
    pub fn unavailable<E: fmt::Display>(msg: E) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Create a connection error
    pub fn connection<E: fmt::Display>(msg: E) -> Self {
        Self::Connection(msg.to_string())
    }

    /// Create an unsupported operation error
    pub fn unsupported<E: fmt::Display>(msg: E) -> Self {
        Self::Unsupported(msg.to_string())
    }

    /// Create a configuration error
    pub fn configuration<E: fmt::Display>(msg: E) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Unavailable(_) | Self::Connection(_) | Self::Timeout(_)
        )
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Connection(format!("request timed out: {}", err));
        }
        match err.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => Self::not_found(err),
            Some(status) if status.is_client_error() => Self::Other(anyhow::anyhow!(err)),
            _ => Self::connection(err),
        }
    }
}

impl From<url::ParseError> for StorageError {
    fn from(err: url::ParseError) -> Self {
        Self::invalid_locator(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(StorageError::unavailable("busy").is_retryable());
        assert!(StorageError::connection("reset").is_retryable());
        assert!(StorageError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(StorageError::Io(std::io::Error::other("eof")).is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!StorageError::not_found("a.csv").is_retryable());
        assert!(!StorageError::invalid_locator("::").is_retryable());
        assert!(!StorageError::unsupported("listing").is_retryable());
        assert!(StorageError::not_found("a.csv").is_not_found());
    }
}
