//! Configuration data types shared across the workspace

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration: one entry per site identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Site used when the caller does not name one
    pub default_site: String,
    pub logging: LoggingConfig,
    pub sites: BTreeMap<String, SiteConfig>,
}

/// Per-site settings consumed by the stores and token services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Top directory containing `sessions/<service-user>/<session-id>`
    pub session_top_path: PathBuf,
    /// Directory holding the token store file
    pub registration_dir: PathBuf,
    /// Directory holding named lock files for token transactions
    pub registration_lock_dir: PathBuf,
    /// Shared HMAC secret for signed tokens
    pub registration_key: String,
    pub token: TokenConfig,
    pub locks: LockConfig,
    /// Free-form site values exposed through `ConfigProvider`
    pub extra: BTreeMap<String, String>,
}

/// Token id and signed token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token id prefix, e.g. `VALWS` gives `VALWS_0000000001`
    pub prefix: Option<String>,
    /// Days until a signed token expires
    pub expire_days: i64,
    /// HMAC algorithm name (HS256, HS384, HS512)
    pub algorithm: String,
}

/// Timeout and retry interval for one lock file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockSettings {
    pub timeout_seconds: f64,
    pub retry_seconds: f64,
}

/// Lock settings per store kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub session_store: LockSettings,
    pub history: LockSettings,
    pub token_store: LockSettings,
    /// Attempts for an unlocked history read that races a writer
    pub history_unlocked_retries: u32,
    pub history_unlocked_delay_seconds: f64,
}
