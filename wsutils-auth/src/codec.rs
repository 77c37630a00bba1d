//! Signing and verification of access tokens

use crate::error::AuthError;
use crate::report::TokenReport;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use wsutils_core::{config_error, SiteConfig, WsResult};

/// Standard claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token id
    pub sub: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
}

impl TokenClaims {
    pub fn new(token_id: &str, expire_days: i64) -> Result<Self, AuthError> {
        let now = Utc::now();
        let lifetime = Duration::try_days(expire_days).ok_or_else(|| {
            AuthError::creation(format!("expiry of {} days is out of range", expire_days))
        })?;
        let exp = now
            .checked_add_signed(lifetime)
            .ok_or_else(|| AuthError::creation("expiry overflows the calendar"))?;

        Ok(Self {
            sub: token_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// HMAC algorithms accepted for the shared secret
pub fn parse_algorithm(name: &str) -> Option<Algorithm> {
    match Algorithm::from_str(&name.to_ascii_uppercase()) {
        Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => Some(alg),
        _ => None,
    }
}

/// Stateless signer/verifier over one shared secret
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], algorithm: Algorithm) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            algorithm,
        }
    }

    pub fn hs256(secret: &[u8]) -> Self {
        Self::new(secret, Algorithm::HS256)
    }

    /// Codec keyed by the site's registration key
    pub fn from_site(site: &SiteConfig) -> WsResult<Self> {
        let algorithm = parse_algorithm(&site.token.algorithm).ok_or_else(|| {
            config_error!(
                format!("Unsupported token algorithm '{}'", site.token.algorithm),
                "auth"
            )
        })?;
        if site.uses_default_key() {
            warn!("Signing tokens with the default registration key");
        }
        Ok(Self::new(site.registration_key.as_bytes(), algorithm))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Signed token for `token_id`, valid for `expire_days` from now.
    /// A negative value yields an already expired token.
    pub fn sign(&self, token_id: &str, expire_days: i64) -> Result<String, AuthError> {
        let claims = TokenClaims::new(token_id, expire_days)?;
        encode(&Header::new(self.algorithm), &claims, &self.encoding).map_err(|e| {
            warn!("Failed to encode token: {}", e);
            AuthError::creation("Failed to create access token")
        })
    }

    /// Decode and check signature and expiry
    pub fn decode(&self, token: &str) -> Result<TokenClaims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::missing());
        }

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<TokenClaims>(token, &self.decoding, &validation).map_err(|e| {
            debug!("Token verification failed: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::expired(),
                ErrorKind::InvalidToken
                | ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => AuthError::invalid(),
                _ => AuthError::processing(),
            }
        })?;

        Ok(data.claims)
    }

    /// [`decode`](Self::decode) folded into a report
    pub fn verify(&self, token: &str) -> TokenReport {
        self.decode(token).into()
    }
}
