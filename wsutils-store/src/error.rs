//! Storage error types

use std::path::PathBuf;
use std::time::Duration;
use wsutils_core::{ErrorContext, WsError};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Lock timeout of {timeout:?} exceeded for {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("Lock file error for {path}: {source}")]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to deserialize {path}: {message}")]
    Deserialization { path: PathBuf, message: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn deserialization(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Deserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_record<S: Into<String>>(message: S) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<StoreError> for WsError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::LockTimeout { path, timeout } => WsError::LockTimeout {
                path: path.display().to_string(),
                timeout_ms: timeout.as_millis() as u64,
                context: ErrorContext::new("store")
                    .with_suggestion("Retry later")
                    .with_suggestion("Clear the lock file if its holder crashed"),
            },
            StoreError::InvalidRecord { message } => WsError::Validation {
                message,
                field: None,
                context: ErrorContext::new("store"),
            },
            other => WsError::Storage {
                message: other.to_string(),
                source: Some(Box::new(other)),
                context: ErrorContext::new("store"),
            },
        }
    }
}
