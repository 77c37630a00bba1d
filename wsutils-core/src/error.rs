//! Unified error handling system
//!
//! Structured error types with context and recovery suggestions. Storage and
//! auth crates keep their own narrower error enums and convert into
//! [`WsError`] at crate boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

pub type WsResult<T> = Result<T, WsError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the toolkit
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Lock timeout after {timeout_ms} ms: {path}")]
    LockTimeout {
        path: String,
        timeout_ms: u64,
        context: ErrorContext,
    },

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        status_code: u16,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl WsError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            WsError::Config { context, .. } => Some(context),
            WsError::Storage { context, .. } => Some(context),
            WsError::LockTimeout { context, .. } => Some(context),
            WsError::Authentication { context, .. } => Some(context),
            WsError::Validation { context, .. } => Some(context),
            WsError::NotFound { context, .. } => Some(context),
            WsError::Internal { context, .. } => Some(context),
            WsError::Io(_) | WsError::Serialization(_) => None,
        }
    }

    /// Check if error is recoverable.
    ///
    /// A lock timeout usually means another worker held the file longer than
    /// expected; retrying later is safe. An orphaned lock will keep failing
    /// until an operator clears it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WsError::LockTimeout { .. } | WsError::Io(_))
    }

    /// HTTP status a caller should surface for this error
    pub fn status_code(&self) -> u16 {
        match self {
            WsError::Authentication { status_code, .. } => *status_code,
            WsError::Validation { .. } => 400,
            WsError::NotFound { .. } => 404,
            WsError::LockTimeout { .. } => 503,
            _ => 500,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            WsError::Internal { .. } => {
                error!(error_id = ?error_id, error = %self, "Internal error occurred");
            }
            WsError::Config { .. } | WsError::Validation { .. } => {
                error!(error_id = ?error_id, error = %self, "Configuration or validation error");
            }
            WsError::LockTimeout { .. } => {
                warn!(error_id = ?error_id, error = %self, "Lock timeout (may be recoverable)");
            }
            WsError::Authentication { .. } => {
                warn!(error_id = ?error_id, error = %self, "Authentication rejected");
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Error occurred");
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::WsError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'wsutils config init' to create a default config"),
        }
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::WsError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::WsError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::WsError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::WsError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Verify the path or identifier"),
        }
    };
}
