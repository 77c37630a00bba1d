//! Persistent token-id registry.
//!
//! Two indexes are kept in one file as two consecutive JSON values: token id
//! to record, then email to token id. Each email maps to at most one live id
//! and every id in either index appears in the other.
//!
//! Mutations run under the named lock [`TOKEN_LOCK_NAME`] and reload the file
//! first, so several processes may issue ids against the same store.

use crate::error::{StoreError, StoreResult};
use crate::kv::write_replacing;
use crate::lock::LockManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use wsutils_core::SiteConfig;

pub const TOKEN_LOCK_NAME: &str = "token-store";
pub const DEFAULT_TOKEN_PREFIX: &str = "WS";
const ANONYMOUS_STORE_FILE: &str = "ANONYMOUSWS_TOKEN_STORE.json";
const MIN_TOKEN_ID_LEN: usize = 12;
const MIN_EMAIL_LEN: usize = 3;

/// Extra fields stored alongside the email
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub email: String,
    #[serde(flatten)]
    pub extra: Metadata,
}

type TokenIndex = BTreeMap<String, TokenRecord>;
type EmailIndex = BTreeMap<String, String>;

/// Store file name for an optional prefix
pub fn store_file_name(prefix: Option<&str>) -> String {
    match prefix {
        Some(p) => format!("{}_TOKEN_STORE.json", p),
        None => ANONYMOUS_STORE_FILE.to_string(),
    }
}

#[derive(Debug)]
pub struct TokenStore {
    file_path: PathBuf,
    prefix: String,
    locks: LockManager,
    tokens: TokenIndex,
    emails: EmailIndex,
}

impl TokenStore {
    /// Open the store in `registration_dir`. A missing file is an empty
    /// store; an unreadable one is an error until [`TokenStore::create`]
    /// replaces it.
    pub fn open<P: AsRef<Path>>(
        registration_dir: P,
        prefix: Option<&str>,
        locks: LockManager,
    ) -> StoreResult<Self> {
        let file_path = registration_dir.as_ref().join(store_file_name(prefix));
        Self::open_file(file_path, prefix, locks)
    }

    /// Open a store at an explicit file path
    pub fn open_file<P: AsRef<Path>>(
        file_path: P,
        prefix: Option<&str>,
        locks: LockManager,
    ) -> StoreResult<Self> {
        let mut store = Self::unloaded(file_path.as_ref(), prefix, locks);
        debug!("Assigning token store file path {}", store.file_path.display());
        let _guard = store.locks.lock_named(TOKEN_LOCK_NAME)?;
        store.reload()?;
        Ok(store)
    }

    /// Write a fresh empty store, replacing whatever is on disk
    pub fn create<P: AsRef<Path>>(
        file_path: P,
        prefix: Option<&str>,
        locks: LockManager,
    ) -> StoreResult<Self> {
        let store = Self::unloaded(file_path.as_ref(), prefix, locks);
        let _guard = store.locks.lock_named(TOKEN_LOCK_NAME)?;
        store.persist()?;
        info!("Created empty token store {}", store.file_path.display());
        Ok(store)
    }

    /// Store for a site's registration directory and lock settings
    pub fn from_site(site: &SiteConfig) -> StoreResult<Self> {
        let locks = LockManager::with_lock_dir(
            &site.registration_lock_dir,
            site.locks.token_store.into(),
        );
        Self::open(&site.registration_dir, site.token.prefix.as_deref(), locks)
    }

    fn unloaded(file_path: &Path, prefix: Option<&str>, locks: LockManager) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            prefix: prefix.unwrap_or(DEFAULT_TOKEN_PREFIX).to_string(),
            locks,
            tokens: TokenIndex::new(),
            emails: EmailIndex::new(),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token_id_exists(&self, token_id: &str) -> bool {
        self.tokens.contains_key(token_id)
    }

    pub fn token_id_email_exists(&self, email: &str) -> bool {
        self.emails.contains_key(email)
    }

    pub fn get_token_id_email(&self, token_id: &str) -> Option<&str> {
        self.tokens.get(token_id).map(|r| r.email.as_str())
    }

    pub fn get_record(&self, token_id: &str) -> Option<&TokenRecord> {
        self.tokens.get(token_id)
    }

    /// Reload both indexes from disk under the store lock
    pub fn refresh(&mut self) -> StoreResult<()> {
        let _guard = self.locks.lock_named(TOKEN_LOCK_NAME)?;
        self.reload()
    }

    /// Id already assigned to `email`, or the next id for this prefix
    pub fn fetch_token_id(&mut self, email: &str) -> StoreResult<String> {
        let _guard = self.locks.lock_named(TOKEN_LOCK_NAME)?;
        self.reload()?;

        if let Some(token_id) = self.emails.get(email) {
            debug!(%token_id, "Reusing token id");
            return Ok(token_id.clone());
        }

        let token_id = format_token_id(&self.prefix, self.next_value()?);
        self.insert_and_persist(&token_id, email, Metadata::new())?;
        info!(%token_id, "Assigned new token id");
        Ok(token_id)
    }

    /// Record `token_id` for `email`, replacing any id the email held before
    pub fn save_token_id(
        &mut self,
        token_id: &str,
        email: &str,
        metadata: Metadata,
    ) -> StoreResult<()> {
        if token_id.len() < MIN_TOKEN_ID_LEN {
            return Err(StoreError::invalid_record(format!(
                "token id '{}' is shorter than {} characters",
                token_id, MIN_TOKEN_ID_LEN
            )));
        }
        if email.len() < MIN_EMAIL_LEN {
            return Err(StoreError::invalid_record(format!(
                "email '{}' is shorter than {} characters",
                email, MIN_EMAIL_LEN
            )));
        }

        let _guard = self.locks.lock_named(TOKEN_LOCK_NAME)?;
        self.reload()?;
        self.insert_and_persist(token_id, email, metadata)
    }

    /// Delete `token_id` and its email mapping. On any failure the indexes
    /// are reloaded from disk and `false` is returned.
    pub fn remove(&mut self, token_id: &str) -> bool {
        let _guard = match self.locks.lock_named(TOKEN_LOCK_NAME) {
            Ok(guard) => guard,
            Err(e) => {
                error!(%token_id, error = %e, "Cannot lock token store for removal");
                return false;
            }
        };

        if let Err(e) = self.reload() {
            error!(%token_id, error = %e, "Cannot load token store for removal");
            return false;
        }

        let Some(record) = self.tokens.remove(token_id) else {
            debug!(%token_id, "Token id not present");
            return false;
        };
        if self.emails.get(&record.email).map(String::as_str) == Some(token_id) {
            self.emails.remove(&record.email);
        }

        match self.persist() {
            Ok(()) => true,
            Err(e) => {
                error!(%token_id, error = %e, "Token removal failed, restoring from disk");
                self.restore();
                false
            }
        }
    }

    /// Every email maps to an id that maps back to it, and vice versa
    pub fn is_consistent(&self) -> bool {
        self.emails.len() == self.tokens.len()
            && self.emails.iter().all(|(email, id)| {
                self.tokens.get(id).map(|r| &r.email) == Some(email)
            })
    }

    fn insert_and_persist(
        &mut self,
        token_id: &str,
        email: &str,
        metadata: Metadata,
    ) -> StoreResult<()> {
        if let Some(previous) = self.emails.get(email).cloned() {
            if previous != token_id {
                self.tokens.remove(&previous);
            }
        }
        if let Some(previous) = self.tokens.get(token_id) {
            if previous.email != email {
                let stale = previous.email.clone();
                self.emails.remove(&stale);
            }
        }

        self.tokens.insert(
            token_id.to_string(),
            TokenRecord {
                email: email.to_string(),
                extra: metadata,
            },
        );
        self.emails.insert(email.to_string(), token_id.to_string());

        if let Err(e) = self.persist() {
            self.restore();
            return Err(e);
        }
        Ok(())
    }

    fn next_value(&self) -> StoreResult<u64> {
        let max = self
            .tokens
            .keys()
            .filter_map(|id| parse_token_id(id))
            .filter(|(prefix, _)| *prefix == self.prefix)
            .map(|(_, value)| value)
            .max();
        match max {
            None => Ok(1),
            Some(max) => max.checked_add(1).ok_or_else(|| {
                StoreError::invalid_record(format!(
                    "token id sequence for prefix '{}' is exhausted",
                    self.prefix
                ))
            }),
        }
    }

    fn restore(&mut self) {
        if let Err(e) = self.reload() {
            warn!(error = %e, "Token store reload failed, clearing in-memory indexes");
            self.tokens.clear();
            self.emails.clear();
        }
    }

    fn reload(&mut self) -> StoreResult<()> {
        let bytes = match fs::read(&self.file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No token store at {}", self.file_path.display());
                self.tokens.clear();
                self.emails.clear();
                return Ok(());
            }
            Err(e) => return Err(StoreError::io(&self.file_path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            self.tokens.clear();
            self.emails.clear();
            return Ok(());
        }

        let (tokens, emails) = decode_indexes(&bytes)
            .map_err(|e| StoreError::deserialization(&self.file_path, e.to_string()))?;
        debug!(
            "Recovered {} token ids {} emails",
            tokens.len(),
            emails.len()
        );
        self.tokens = tokens;
        self.emails = emails;
        Ok(())
    }

    fn persist(&self) -> StoreResult<()> {
        let encode = |e: serde_json::Error| StoreError::Serialization {
            path: self.file_path.clone(),
            source: e,
        };
        let mut data = serde_json::to_vec(&self.tokens).map_err(encode)?;
        data.push(b'\n');
        data.extend(serde_json::to_vec(&self.emails).map_err(encode)?);
        data.push(b'\n');

        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        write_replacing(&self.file_path, &data)
    }
}

fn decode_indexes(bytes: &[u8]) -> serde_json::Result<(TokenIndex, EmailIndex)> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let tokens = TokenIndex::deserialize(&mut de)?;
    let emails = EmailIndex::deserialize(&mut de)?;
    de.end()?;
    Ok((tokens, emails))
}

/// `<prefix>_<10-digit zero-padded value>`
pub fn format_token_id(prefix: &str, value: u64) -> String {
    format!("{}_{:010}", prefix, value)
}

/// Split an id into prefix and numeric part
pub fn parse_token_id(token_id: &str) -> Option<(&str, u64)> {
    let (prefix, digits) = token_id.rsplit_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = digits.parse().ok()?;
    Some((prefix, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_id_format() {
        assert_eq!(format_token_id("WS", 7), "WS_0000000007");
        assert_eq!(parse_token_id("WS_0000000007"), Some(("WS", 7)));
        assert_eq!(parse_token_id("MY_SITE_0000000012"), Some(("MY_SITE", 12)));
        assert_eq!(parse_token_id("nonsense"), None);
        assert_eq!(parse_token_id("WS_abc"), None);
        assert_eq!(parse_token_id("WS_+5"), None);
        assert_eq!(parse_token_id("WS_"), None);
        assert_eq!(parse_token_id("WS_99999999999999999999"), None);
    }

    #[test]
    fn test_store_file_name() {
        assert_eq!(store_file_name(Some("DEP")), "DEP_TOKEN_STORE.json");
        assert_eq!(store_file_name(None), "ANONYMOUSWS_TOKEN_STORE.json");
    }

    #[test]
    fn test_decode_two_values() {
        let raw = br#"{"WS_0000000001":{"email":"a@b.org","note":"x"}}
{"a@b.org":"WS_0000000001"}
"#;
        let (tokens, emails) = decode_indexes(raw).unwrap();
        assert_eq!(tokens["WS_0000000001"].email, "a@b.org");
        assert_eq!(tokens["WS_0000000001"].extra["note"], "x");
        assert_eq!(emails["a@b.org"], "WS_0000000001");

        assert!(decode_indexes(b"{}").is_err());
        assert!(decode_indexes(b"{} {} {}").is_err());
    }
}
