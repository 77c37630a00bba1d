//! Authentication failure kinds

use serde::Serialize;
use wsutils_core::{ErrorContext, WsError};

/// HTTP status reported for every token failure
pub const TOKEN_ERROR_CODE: u16 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthErrorKind {
    MalformedAuthorization,
    InvalidToken,
    ExpiredToken,
    MissingToken,
    TokenCreation,
}

impl AuthErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            AuthErrorKind::TokenCreation => 500,
            _ => TOKEN_ERROR_CODE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::MalformedAuthorization, message)
    }

    pub fn missing() -> Self {
        Self::new(AuthErrorKind::MissingToken, "Missing token")
    }

    pub fn invalid() -> Self {
        Self::new(AuthErrorKind::InvalidToken, "API access token is invalid")
    }

    pub fn processing() -> Self {
        Self::new(AuthErrorKind::InvalidToken, "API access token processing error")
    }

    pub fn expired() -> Self {
        Self::new(AuthErrorKind::ExpiredToken, "API access token has expired")
    }

    pub fn creation(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::TokenCreation, message)
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

impl From<AuthError> for WsError {
    fn from(error: AuthError) -> Self {
        WsError::Authentication {
            status_code: error.status_code(),
            context: ErrorContext::new("auth").with_metadata("kind", &format!("{:?}", error.kind)),
            message: error.message,
        }
    }
}
