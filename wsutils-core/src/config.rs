//! Configuration management
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! `WSUTILS__*` environment variables.

use crate::error::{ErrorContext, WsError, WsResult};
use crate::types::{LockConfig, LockSettings, SiteConfig, TokenConfig, WsConfig};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Secret used when a site does not configure one
pub const DEFAULT_REGISTRATION_KEY: &str = "secretvalue";
pub const DEFAULT_SITE: &str = "default";

pub const KEY_REGISTRATION_DIR: &str = "SITE_SERVICE_REGISTRATION_DIR_PATH";
pub const KEY_REGISTRATION_LOCK_DIR: &str = "SITE_SERVICE_REGISTRATION_LOCKDIR_PATH";
pub const KEY_REGISTRATION_KEY: &str = "SITE_SERVICE_REGISTRATION_KEY";
pub const KEY_SESSIONS_PATH: &str = "SITE_SESSIONS_PATH";

/// Key/value view of site configuration
pub trait ConfigProvider {
    fn get(&self, key: &str, default: &str) -> String;
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 15.0,
            retry_seconds: 0.2,
        }
    }
}

impl LockSettings {
    pub fn new(timeout_seconds: f64, retry_seconds: f64) -> Self {
        Self {
            timeout_seconds,
            retry_seconds,
        }
    }

    /// Falls back to the default timeout when the value is not finite
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout_seconds, Self::default().timeout_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        seconds_or(self.retry_seconds, Self::default().retry_seconds)
    }

    fn is_valid(&self) -> bool {
        [self.timeout_seconds, self.retry_seconds]
            .iter()
            .all(|s| s.is_finite() && *s > 0.0)
    }
}

impl LockConfig {
    pub fn history_unlocked_delay(&self) -> Duration {
        seconds_or(
            self.history_unlocked_delay_seconds,
            Self::default().history_unlocked_delay_seconds,
        )
    }
}

/// Negative values clamp to zero, NaN and infinities take `fallback`
pub fn seconds_or(value: f64, fallback: f64) -> Duration {
    let value = if value.is_finite() { value } else { fallback };
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            session_store: LockSettings::new(8.0, 0.2),
            history: LockSettings::new(2.0, 0.1),
            token_store: LockSettings::new(15.0, 0.2),
            history_unlocked_retries: 5,
            history_unlocked_delay_seconds: 3.0,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            expire_days: 30,
            algorithm: "HS256".to_string(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            session_top_path: PathBuf::from("."),
            registration_dir: PathBuf::from("."),
            registration_lock_dir: PathBuf::from("."),
            registration_key: DEFAULT_REGISTRATION_KEY.to_string(),
            token: TokenConfig::default(),
            locks: LockConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        let mut sites = BTreeMap::new();
        sites.insert(DEFAULT_SITE.to_string(), SiteConfig::default());
        Self {
            default_site: DEFAULT_SITE.to_string(),
            logging: crate::logging::LoggingConfig::default(),
            sites,
        }
    }
}

impl SiteConfig {
    /// Site config rooted in one directory, handy for tools and tests
    pub fn rooted_at<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            session_top_path: root.to_path_buf(),
            registration_dir: root.join("registration"),
            registration_lock_dir: root.join("registration").join("locks"),
            ..Self::default()
        }
    }

    pub fn uses_default_key(&self) -> bool {
        self.registration_key == DEFAULT_REGISTRATION_KEY
    }
}

impl ConfigProvider for SiteConfig {
    fn get(&self, key: &str, default: &str) -> String {
        let value = match key {
            KEY_REGISTRATION_DIR => Some(self.registration_dir.to_string_lossy().into_owned()),
            KEY_REGISTRATION_LOCK_DIR => {
                Some(self.registration_lock_dir.to_string_lossy().into_owned())
            }
            KEY_REGISTRATION_KEY => Some(self.registration_key.clone()),
            KEY_SESSIONS_PATH => Some(self.session_top_path.to_string_lossy().into_owned()),
            _ => self
                .extra
                .get(key)
                .or_else(|| self.extra.get(&key.to_lowercase()))
                .cloned(),
        };

        match value {
            Some(v) if !v.is_empty() => v,
            _ => default.to_string(),
        }
    }
}

impl WsConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> WsResult<Self> {
        let defaults = toml::to_string(&WsConfig::default()).map_err(|e| WsError::Config {
            message: format!("Failed to serialize default config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_defaults"),
        })?;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(&defaults, config::FileFormat::Toml));

        if let Some(path) = path {
            debug!("Layering config file {}", path.display());
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WSUTILS")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().map_err(|e| WsError::Config {
            message: format!("Failed to load config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("build")
                .with_suggestion("Check TOML syntax and WSUTILS__* environment variables"),
        })?;

        settings.try_deserialize().map_err(|e| WsError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("deserialize"),
        })
    }

    /// Load configuration from a TOML file only
    pub fn from_file<P: AsRef<Path>>(path: P) -> WsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| WsError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        toml::from_str(&content).map_err(|e| WsError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> WsResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| WsError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| WsError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Default per-user config location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("wsutils").join("config.toml"))
    }

    /// Look up a site, falling back to `default_site`
    pub fn site(&self, site_id: Option<&str>) -> WsResult<&SiteConfig> {
        let id = site_id.unwrap_or(&self.default_site);
        self.sites
            .get(id)
            .or_else(|| self.sites.get(&id.to_lowercase()))
            .ok_or_else(|| WsError::NotFound {
                resource: format!("site '{}'", id),
                context: ErrorContext::new("config")
                    .with_operation("site")
                    .with_suggestion("Add a [sites.<id>] table to the config file"),
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> WsResult<()> {
        self.site(None)?;

        for (id, site) in &self.sites {
            if site.registration_key.is_empty() {
                return Err(WsError::Config {
                    message: format!("Site '{}' has an empty registration_key", id),
                    source: None,
                    context: ErrorContext::new("config")
                        .with_operation("validate")
                        .with_suggestion("Set sites.<id>.registration_key"),
                });
            }

            if site.uses_default_key() {
                warn!(site = %id, "Site uses the default registration key; change it in production");
            }

            if site.token.expire_days <= 0 {
                return Err(WsError::Config {
                    message: format!("Site '{}' token.expire_days must be positive", id),
                    source: None,
                    context: ErrorContext::new("config").with_operation("validate"),
                });
            }

            if !matches!(site.token.algorithm.as_str(), "HS256" | "HS384" | "HS512") {
                return Err(WsError::Config {
                    message: format!(
                        "Site '{}' token.algorithm '{}' is not an HMAC algorithm",
                        id, site.token.algorithm
                    ),
                    source: None,
                    context: ErrorContext::new("config")
                        .with_operation("validate")
                        .with_suggestion("Use HS256, HS384 or HS512"),
                });
            }

            for (name, lock) in [
                ("session_store", &site.locks.session_store),
                ("history", &site.locks.history),
                ("token_store", &site.locks.token_store),
            ] {
                if !lock.is_valid() {
                    return Err(WsError::Config {
                        message: format!(
                            "Site '{}' locks.{} needs finite positive timeout and retry values",
                            id, name
                        ),
                        source: None,
                        context: ErrorContext::new("config").with_operation("validate"),
                    });
                }
            }

            let delay = site.locks.history_unlocked_delay_seconds;
            if !delay.is_finite() || delay < 0.0 {
                return Err(WsError::Config {
                    message: format!(
                        "Site '{}' locks.history_unlocked_delay_seconds must be finite and not negative",
                        id
                    ),
                    source: None,
                    context: ErrorContext::new("config").with_operation("validate"),
                });
            }
        }

        Ok(())
    }
}
