//! Structured outcomes returned instead of errors.
//!
//! Serialized with the field names web clients already consume
//! (`errorCode`, `errorMessage`, `errorFlag`).

use crate::codec::TokenClaims;
use crate::error::{AuthError, AuthErrorKind};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub error_code: Option<u16>,
    pub error_message: Option<String>,
    pub error_flag: bool,
    #[serde(skip)]
    pub kind: Option<AuthErrorKind>,
}

impl Diagnostics {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(error: &AuthError) -> Self {
        Self {
            error_code: Some(error.status_code()),
            error_message: Some(error.message.clone()),
            error_flag: true,
            kind: Some(error.kind),
        }
    }
}

/// Decoded claims plus diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenReport {
    #[serde(flatten)]
    pub claims: Option<TokenClaims>,
    #[serde(flatten)]
    pub diagnostics: Diagnostics,
}

impl TokenReport {
    pub fn valid(claims: TokenClaims) -> Self {
        Self {
            claims: Some(claims),
            diagnostics: Diagnostics::ok(),
        }
    }

    pub fn failed(error: &AuthError) -> Self {
        Self {
            claims: None,
            diagnostics: Diagnostics::failed(error),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.diagnostics.error_flag
    }

    pub fn kind(&self) -> Option<AuthErrorKind> {
        self.diagnostics.kind
    }

    /// Token id carried in the `sub` claim
    pub fn subject(&self) -> Option<&str> {
        self.claims.as_ref().map(|c| c.sub.as_str())
    }
}

impl From<Result<TokenClaims, AuthError>> for TokenReport {
    fn from(result: Result<TokenClaims, AuthError>) -> Self {
        match result {
            Ok(claims) => Self::valid(claims),
            Err(e) => Self::failed(&e),
        }
    }
}

/// Bearer token extracted from an authorization header
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BearerReport {
    pub token: Option<String>,
    #[serde(flatten)]
    pub diagnostics: Diagnostics,
}

impl BearerReport {
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.error_flag
    }
}

impl From<Result<String, AuthError>> for BearerReport {
    fn from(result: Result<String, AuthError>) -> Self {
        match result {
            Ok(token) => Self {
                token: Some(token),
                diagnostics: Diagnostics::ok(),
            },
            Err(e) => Self {
                token: None,
                diagnostics: Diagnostics::failed(&e),
            },
        }
    }
}
