//! # Error Handling
//!
//! Error types for Drillstore operations.
//!
//! Codec and store failures are returned as typed variants so a caller can tell a
//! malformed request (`Format`, `DuplicateIndex`) from a storage limit
//! (`DocumentTooLarge`, `MaxDataExceeded`) or a missing object (`ParentNotFound`).
//! Concurrent overlapping writes are not an error: they are resolved
//! last-write-wins and only logged.

use thiserror::Error;

/// Result type alias for Drillstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for Drillstore
#[derive(Error, Debug)]
pub enum Error {
    // Codec errors
    #[error("Format error at row {row}: {message}")]
    Format { row: usize, message: String },

    #[error("Duplicate index {index} at row {row}")]
    DuplicateIndex { index: String, row: usize },

    // Chunk store errors
    #[error("Document too large: {size} bytes exceeds limit of {limit} bytes")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("Too much data in one operation: {count} exceeds limit of {limit}")]
    MaxDataExceeded { count: usize, limit: usize },

    // Object errors
    #[error("Parent not found for {uri}")]
    ParentNotFound { uri: String },

    #[error("Not found: {uri}")]
    NotFound { uri: String },

    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    // Transaction errors
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    // System errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Check if the request could succeed when retried with different input
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io { .. } => false,
            Error::Internal { .. } => false,
            Error::Serialization { .. } => false,
            _ => true,
        }
    }

    /// Get error code for logging and monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Format { .. } => "FORMAT_ERROR",
            Error::DuplicateIndex { .. } => "DUPLICATE_INDEX",
            Error::DocumentTooLarge { .. } => "DOCUMENT_TOO_LARGE",
            Error::MaxDataExceeded { .. } => "MAX_DATA_EXCEEDED",
            Error::ParentNotFound { .. } => "PARENT_NOT_FOUND",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::InvalidUri { .. } => "INVALID_URI",
            Error::InvalidOperation { .. } => "INVALID_OPERATION",
            Error::Transaction { .. } => "TRANSACTION_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn format(row: usize, message: impl Into<String>) -> Self {
        Error::Format {
            row,
            message: message.into(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            // Keep typed variants callers match on
            Error::DuplicateIndex { .. }
            | Error::DocumentTooLarge { .. }
            | Error::ParentNotFound { .. }
            | Error::Format { .. } => e,
            other => Error::Internal {
                message: format!("{}: {}", f(), other),
            },
        })
    }
}
