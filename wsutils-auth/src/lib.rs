//! Access tokens for the web-service toolkit.
//!
//! Token ids come from [`wsutils_store::TokenStore`]; signed tokens are
//! HMAC JWTs carrying the id as subject. Verification failures are reported
//! as values ([`TokenReport`], [`BearerReport`]) rather than errors.

pub mod codec;
pub mod error;
pub mod header;
pub mod report;
pub mod service;

pub use codec::{parse_algorithm, TokenClaims, TokenCodec};
pub use error::{AuthError, AuthErrorKind, TOKEN_ERROR_CODE};
pub use header::{extract_bearer, parse_auth};
pub use report::{BearerReport, Diagnostics, TokenReport};
pub use service::{TokenService, TokenVerifier};
