use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use wsutils_auth::TokenService;
use wsutils_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success,
    validation_error, ErrorContext, LoggingConfig, SiteConfig, WsConfig, WsError, WsResult,
};
use wsutils_service::SessionFactory;
use wsutils_store::history::HistoryOptions;
use wsutils_store::lock::lock_path_for;
use wsutils_store::tokens::TOKEN_LOCK_NAME;
use wsutils_store::{HistoryLog, KeyValueStore, LockFile, Payload, StoreValue};

#[derive(Parser)]
#[command(name = "wsutils")]
#[command(about = "Inspect and maintain web service session stores, history logs and access tokens")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Site identifier (defaults to the configured default site)
    #[arg(short, long, global = true)]
    site: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Session key/value store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Per-user service history log
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Access token ids and signed tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Lock files left behind by stores
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Print every key of a session store
    Dump {
        /// Session directory
        session: PathBuf,
        /// Store file prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Print one value as JSON
    Get {
        session: PathBuf,
        key: String,
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Store a value; JSON text is parsed, anything else is kept as a string
    Set {
        session: PathBuf,
        key: String,
        value: String,
        #[arg(short, long)]
        prefix: Option<String>,
        /// Leave an existing value in place
        #[arg(long)]
        keep: bool,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Session counts and elapsed times for a service user
    Summary {
        /// Service user whose history is read
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Latest record per session and operation
    Show {
        #[arg(short, long)]
        user: Option<String>,
        /// Only this session
        #[arg(long)]
        session_id: Option<String>,
        /// Read without taking the history lock
        #[arg(long)]
        unlocked: bool,
    },
    /// Append a record
    Add {
        #[arg(short, long)]
        user: Option<String>,
        session_id: String,
        /// Operation name (created, submitted, completed, failed, ...)
        operation: String,
        /// JSON object stored as the record payload
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a signed token for an email, reusing its token id
    Issue {
        email: String,
        /// Days until expiry (defaults to the site setting)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Verify a signed token or a full `Bearer <token>` header
    Verify { token: String },
    /// Remove a token id from the store
    Remove { token_id: String },
    /// Print the email registered for a token id
    Lookup { token_id: String },
}

#[derive(Subcommand)]
enum LockAction {
    /// Report whether a lock file exists and who holds it
    Status {
        /// Data file guarded by the lock (defaults to the token store lock)
        target: Option<PathBuf>,
    },
    /// Delete a lock file left by a crashed holder
    Clear { target: Option<PathBuf> },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Destination (defaults to the per-user config location)
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration
    Validate,
}

fn main() -> WsResult<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
        logging_config.filter_directives.clear();
    }
    start_logging(&logging_config)?;

    info!("Starting wsutils v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Store { action } => handle_store(action),
        Commands::History { action } => {
            let site = config.site(cli.site.as_deref())?;
            handle_history(action, site)
        }
        Commands::Token { action } => {
            let site = config.site(cli.site.as_deref())?;
            handle_token(action, site)
        }
        Commands::Lock { action } => {
            let site = config.site(cli.site.as_deref())?;
            handle_lock(action, site)
        }
        Commands::Config { action } => handle_config(action, &config, cli.config.as_deref()),
    };

    if let Err(e) = &result {
        e.log();
    }
    result
}

fn start_logging(config: &LoggingConfig) -> WsResult<()> {
    init_logging(config).map_err(|e| WsError::Config {
        message: format!("Failed to initialize logging: {}", e),
        source: Some(e),
        context: ErrorContext::new("cli")
            .with_operation("init_logging")
            .with_suggestion("Check the [logging] table of the config file"),
    })
}

/// Explicit path, then the per-user config file if present, then defaults
fn load_config(path: Option<&Path>) -> WsResult<WsConfig> {
    if let Some(path) = path {
        return WsConfig::load(Some(path));
    }
    match WsConfig::default_path().filter(|p| p.exists()) {
        Some(default_path) => WsConfig::load(Some(&default_path)),
        None => WsConfig::load(None),
    }
}

fn handle_store(action: StoreAction) -> WsResult<()> {
    match action {
        StoreAction::Dump { session, prefix } => {
            let store = open_store(&session, prefix.as_deref())?;
            println!("{}", store.dump());
        }
        StoreAction::Get {
            session,
            key,
            prefix,
        } => {
            let store = open_store(&session, prefix.as_deref())?;
            match store.lookup(&key) {
                Some(value) => println!("{}", value),
                None => {
                    return Err(WsError::NotFound {
                        resource: format!("key '{}' in {}", key, store.file_path().display()),
                        context: ErrorContext::new("cli").with_operation("store_get"),
                    })
                }
            }
        }
        StoreAction::Set {
            session,
            key,
            value,
            prefix,
            keep,
        } => {
            log_operation_start!("store_set", key = %key);
            let store = open_store(&session, prefix.as_deref())?;
            if !store.set(&key, parse_store_value(&value), !keep) {
                let err = WsError::Storage {
                    message: format!("Failed to write {}", store.file_path().display()),
                    source: None,
                    context: ErrorContext::new("cli")
                        .with_operation("store_set")
                        .with_suggestion("Check for a stale lock with 'wsutils lock status'"),
                };
                log_operation_error!("store_set", err);
                return Err(err);
            }
            log_operation_success!("store_set", key = %key);
        }
    }
    Ok(())
}

fn open_store(session: &Path, prefix: Option<&str>) -> WsResult<KeyValueStore> {
    if !session.is_dir() {
        return Err(WsError::NotFound {
            resource: format!("session directory {}", session.display()),
            context: ErrorContext::new("cli").with_operation("open_store"),
        });
    }
    Ok(KeyValueStore::new(session, prefix))
}

/// JSON text becomes the matching value; anything else is a plain string
fn parse_store_value(raw: &str) -> StoreValue {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => StoreValue::from(value),
        Err(_) => StoreValue::from(raw),
    }
}

fn handle_history(action: HistoryAction, site: &SiteConfig) -> WsResult<()> {
    match action {
        HistoryAction::Summary { user } => {
            let log = history_log(site, user.as_deref());
            print_json(&log.get_activity_summary())?;
        }
        HistoryAction::Show {
            user,
            session_id,
            unlocked,
        } => {
            let log = history_log(site, user.as_deref());
            match session_id {
                Some(id) => match log.session_history(&id) {
                    Some(entries) => print_json(&entries)?,
                    None => {
                        return Err(WsError::NotFound {
                            resource: format!("history for session '{}'", id),
                            context: ErrorContext::new("cli").with_operation("history_show"),
                        })
                    }
                },
                None => print_json(&log.get_history(!unlocked))?,
            }
        }
        HistoryAction::Add {
            user,
            session_id,
            operation,
            data,
        } => {
            let payload = parse_payload(data.as_deref())?;
            let log = history_log(site, user.as_deref());
            log_operation_start!("history_add", session_id = %session_id, op = %operation);
            if !log.add(&session_id, &operation, payload) {
                let err = WsError::Storage {
                    message: format!("Failed to append to {}", log.file_path().display()),
                    source: None,
                    context: ErrorContext::new("cli").with_operation("history_add"),
                };
                log_operation_error!("history_add", err);
                return Err(err);
            }
            log_operation_success!("history_add", session_id = %session_id);
        }
    }
    Ok(())
}

fn history_log(site: &SiteConfig, user: Option<&str>) -> HistoryLog {
    let factory = SessionFactory::new(Some(&site.session_top_path), user);
    let dir = factory.session_user_path();
    debug!("History directory {}", dir.display());
    HistoryLog::with_options(dir, HistoryOptions::from(&site.locks))
}

fn parse_payload(data: Option<&str>) -> WsResult<Payload> {
    let Some(data) = data else {
        return Ok(Payload::new());
    };
    match serde_json::from_str::<Value>(data)? {
        Value::Object(map) => Ok(map),
        _ => Err(validation_error!(
            "History data must be a JSON object",
            "data",
            "cli"
        )),
    }
}

fn handle_token(action: TokenAction, site: &SiteConfig) -> WsResult<()> {
    let mut service = TokenService::from_site(site)?;
    match action {
        TokenAction::Issue { email, days } => {
            log_operation_start!("token_issue", email = %email);
            let days = days.unwrap_or(site.token.expire_days);
            let (token_id, token) = service
                .get_token_with_expiry(&email, days)
                .inspect_err(|e| log_operation_error!("token_issue", e))?;
            log_operation_success!("token_issue", token_id = %token_id);
            println!("token_id: {}", token_id);
            println!("expires_in_days: {}", days);
            println!("token: {}", token);
        }
        TokenAction::Verify { token } => {
            let report = if token.trim_start().starts_with("Bearer") {
                service.authorize(&token)
            } else {
                service.parse_token(token.trim())
            };
            print_json(&report)?;
            if !report.is_valid() {
                return Err(WsError::Authentication {
                    message: report.diagnostics.error_message.clone().unwrap_or_default(),
                    status_code: report.diagnostics.error_code.unwrap_or(401),
                    context: ErrorContext::new("cli").with_operation("token_verify"),
                });
            }
        }
        TokenAction::Remove { token_id } => {
            if service.revoke(&token_id) {
                println!("Removed {}", token_id);
            } else {
                return Err(WsError::NotFound {
                    resource: format!("token id '{}'", token_id),
                    context: ErrorContext::new("cli").with_operation("token_remove"),
                });
            }
        }
        TokenAction::Lookup { token_id } => match service.store().get_token_id_email(&token_id) {
            Some(email) => println!("{} {}", token_id, email),
            None => {
                return Err(WsError::NotFound {
                    resource: format!("token id '{}'", token_id),
                    context: ErrorContext::new("cli").with_operation("token_lookup"),
                })
            }
        },
    }
    Ok(())
}

fn handle_lock(action: LockAction, site: &SiteConfig) -> WsResult<()> {
    match action {
        LockAction::Status { target } => {
            let target = lock_target(target, site);
            if LockFile::exists(&target) {
                let holder = LockFile::holder_pid(&target)
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                println!("{}: locked (pid {})", target.display(), holder);
            } else {
                println!("{}: unlocked", target.display());
            }
        }
        LockAction::Clear { target } => {
            let target = lock_target(target, site);
            if LockFile::clear_stale(&target)? {
                println!("Cleared {}", lock_path_for(&target).display());
            } else {
                println!("No lock file for {}", target.display());
            }
        }
    }
    Ok(())
}

fn lock_target(target: Option<PathBuf>, site: &SiteConfig) -> PathBuf {
    target.unwrap_or_else(|| site.registration_lock_dir.join(TOKEN_LOCK_NAME))
}

fn handle_config(
    action: ConfigAction,
    config: &WsConfig,
    config_path: Option<&Path>,
) -> WsResult<()> {
    match action {
        ConfigAction::Show => {
            let text = toml::to_string_pretty(config).map_err(|e| WsError::Config {
                message: format!("Failed to serialize config: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("cli").with_operation("config_show"),
            })?;
            println!("{}", text);
        }
        ConfigAction::Init { path, force } => {
            let path = path
                .or_else(|| config_path.map(Path::to_path_buf))
                .or_else(WsConfig::default_path)
                .or_else(|| dirs::home_dir().map(|d| d.join(".wsutils").join("config.toml")))
                .ok_or_else(|| WsError::Config {
                    message: "No config directory available".to_string(),
                    source: None,
                    context: ErrorContext::new("cli")
                        .with_operation("config_init")
                        .with_suggestion("Pass an explicit path to 'wsutils config init'"),
                })?;

            if path.exists() && !force {
                return Err(validation_error!(
                    format!("{} already exists; use --force to overwrite", path.display()),
                    "path",
                    "cli"
                ));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            WsConfig::default().save_to_file(&path)?;
            println!("Configuration initialized at: {}", path.display());
            println!("Set sites.<id>.registration_key before issuing tokens.");
        }
        ConfigAction::Validate => match config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => {
                println!("Configuration validation failed: {}", e);
                return Err(e);
            }
        },
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> WsResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_store_value() {
        assert_eq!(parse_store_value("42"), StoreValue::from(42));
        assert_eq!(parse_store_value("plain text"), StoreValue::from("plain text"));
        assert_eq!(
            parse_store_value(r#"["a","b"]"#),
            StoreValue::sequence(["a", "b"])
        );
    }

    #[test]
    fn test_parse_payload() {
        assert!(parse_payload(None).unwrap().is_empty());
        let payload = parse_payload(Some(r#"{"file": "x.cif"}"#)).unwrap();
        assert_eq!(payload["file"], "x.cif");
        assert!(parse_payload(Some("[1, 2]")).is_err());
        assert!(parse_payload(Some("{")).is_err());
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from(["wsutils", "token", "issue", "a@b.org", "--site", "val"]);
        assert_eq!(cli.site.as_deref(), Some("val"));
        assert!(matches!(
            cli.command,
            Commands::Token {
                action: TokenAction::Issue { days: None, .. }
            }
        ));
    }

    #[test]
    fn test_config_init_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("config.toml");
        let config = WsConfig::default();
        let init = |force| ConfigAction::Init {
            path: Some(path.clone()),
            force,
        };

        handle_config(init(false), &config, None).unwrap();
        assert!(path.exists());
        assert!(handle_config(init(false), &config, None).is_err());
        handle_config(init(true), &config, None).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.default_site, config.default_site);
        handle_config(ConfigAction::Validate, &loaded, Some(&path)).unwrap();
    }

    #[test]
    fn test_open_store_needs_session_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            open_store(&dir.path().join("missing"), None),
            Err(WsError::NotFound { .. })
        ));

        let store = open_store(dir.path(), Some("cli")).unwrap();
        assert!(store.set("entry", "D_1", true));
        assert_eq!(store.get("entry"), StoreValue::from("D_1"));
    }

    #[test]
    fn test_lock_target_defaults_to_token_lock() {
        let site = SiteConfig::rooted_at("/srv/ws");
        assert_eq!(
            lock_target(None, &site),
            PathBuf::from("/srv/ws/registration/locks/token-store")
        );
    }
}
