//! Token issuance and request authorization.
//!
//! [`TokenService`] owns a [`TokenStore`] and issues tokens; [`TokenVerifier`]
//! only checks them. Both delegate verification to the same [`TokenCodec`].

use crate::codec::TokenCodec;
use crate::error::AuthError;
use crate::header::extract_bearer;
use crate::report::{BearerReport, TokenReport};
use tracing::{debug, info};
use wsutils_core::{SiteConfig, WsResult};
use wsutils_store::TokenStore;

/// Validate the bearer token in an authorization header
fn authorize_with(codec: &TokenCodec, header: &str) -> TokenReport {
    extract_bearer(header)
        .and_then(|token| codec.decode(&token))
        .into()
}

#[derive(Debug)]
pub struct TokenService {
    store: TokenStore,
    codec: TokenCodec,
    expire_days: i64,
}

impl TokenService {
    pub fn new(store: TokenStore, codec: TokenCodec, expire_days: i64) -> Self {
        Self {
            store,
            codec,
            expire_days,
        }
    }

    /// Service over the site's token store, key and expiry
    pub fn from_site(site: &SiteConfig) -> WsResult<Self> {
        let store = TokenStore::from_site(site)?;
        let codec = TokenCodec::from_site(site)?;
        Ok(Self::new(store, codec, site.token.expire_days))
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TokenStore {
        &mut self.store
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Token id for `email` (reused if already assigned) and a fresh signed
    /// token for it
    pub fn get_token(&mut self, email: &str) -> WsResult<(String, String)> {
        self.get_token_with_expiry(email, self.expire_days)
    }

    pub fn get_token_with_expiry(
        &mut self,
        email: &str,
        expire_days: i64,
    ) -> WsResult<(String, String)> {
        let token_id = self.store.fetch_token_id(email)?;
        let token = self.codec.sign(&token_id, expire_days)?;
        info!(%token_id, expire_days, "Issued access token");
        Ok((token_id, token))
    }

    /// Drop the id behind future tokens. Already signed tokens still verify
    /// until they expire.
    pub fn revoke(&mut self, token_id: &str) -> bool {
        let removed = self.store.remove(token_id);
        debug!(%token_id, removed, "Token id removal");
        removed
    }

    pub fn parse_auth(&self, header: &str) -> BearerReport {
        crate::header::parse_auth(header)
    }

    pub fn parse_token(&self, token: &str) -> TokenReport {
        self.codec.verify(token)
    }

    pub fn authorize(&self, header: &str) -> TokenReport {
        authorize_with(&self.codec, header)
    }

    pub fn sign(&self, token_id: &str) -> Result<String, AuthError> {
        self.codec.sign(token_id, self.expire_days)
    }
}

/// Read-only verification for request handlers
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    codec: TokenCodec,
}

impl TokenVerifier {
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }

    pub fn from_site(site: &SiteConfig) -> WsResult<Self> {
        Ok(Self::new(TokenCodec::from_site(site)?))
    }

    pub fn parse_auth(&self, header: &str) -> BearerReport {
        crate::header::parse_auth(header)
    }

    pub fn parse_token(&self, token: &str) -> TokenReport {
        self.codec.verify(token)
    }

    pub fn authorize(&self, header: &str) -> TokenReport {
        authorize_with(&self.codec, header)
    }
}

impl From<&TokenService> for TokenVerifier {
    fn from(service: &TokenService) -> Self {
        Self::new(service.codec.clone())
    }
}
