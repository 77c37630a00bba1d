//! Request routing plus the session, history and auth plumbing shared by
//! service operations.

use crate::request::{ServiceRequest, KEY_REMOTE_ADDR};
use crate::session::SessionFactory;
use crate::state::SessionState;
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use wsutils_auth::{TokenReport, TokenVerifier};
use wsutils_core::{LockConfig, WsResult};
use wsutils_store::history::HistoryOptions;
use wsutils_store::kv::DEFAULT_PREFIX;
use wsutils_store::{
    ActivitySummary, HistoryLog, KeyValueStore, LockOptions, Payload, StoreMap, StoreValue,
};

/// Operation bound to a request path
pub type Operation = fn(&mut ServiceWorker) -> WsResult<SessionState>;

const SESSION_HISTORY_KEY: &str = "session_history";

/// Options for [`ServiceWorker::open_session_with`]
#[derive(Debug, Clone, Copy)]
pub struct OpenSession {
    pub new: bool,
    /// Import the session store into the request parameters
    pub use_context: bool,
    pub overwrite_context: bool,
    pub track_history: bool,
}

impl Default for OpenSession {
    fn default() -> Self {
        Self {
            new: false,
            use_context: false,
            overwrite_context: true,
            track_history: true,
        }
    }
}

pub struct ServiceWorker {
    request: ServiceRequest,
    store_prefix: String,
    locks: LockConfig,
    routes: BTreeMap<String, Operation>,
    session: Option<SessionFactory>,
    session_path: Option<PathBuf>,
    store: Option<KeyValueStore>,
}

impl ServiceWorker {
    pub fn new(request: ServiceRequest, store_prefix: Option<&str>) -> Self {
        Self {
            request,
            store_prefix: store_prefix.unwrap_or(DEFAULT_PREFIX).to_string(),
            locks: LockConfig::default(),
            routes: BTreeMap::new(),
            session: None,
            session_path: None,
            store: None,
        }
    }

    /// Lock timings for the session store and history
    pub fn with_locks(mut self, locks: LockConfig) -> Self {
        self.locks = locks;
        self
    }

    pub fn add_service(&mut self, path: impl Into<String>, op: Operation) {
        self.routes.insert(path.into(), op);
    }

    pub fn add_services<I, K>(&mut self, services: I)
    where
        I: IntoIterator<Item = (K, Operation)>,
        K: Into<String>,
    {
        for (path, op) in services {
            self.add_service(path, op);
        }
    }

    pub fn request(&self) -> &ServiceRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut ServiceRequest {
        &mut self.request
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().and_then(SessionFactory::id)
    }

    pub fn session_path(&self) -> Option<&Path> {
        self.session_path.as_deref()
    }

    pub fn relative_session_path(&self) -> Option<String> {
        self.session.as_ref().and_then(SessionFactory::relative_path)
    }

    pub fn store(&self) -> Option<&KeyValueStore> {
        self.store.as_ref()
    }

    /// Dispatch the request path (or `path`) to its operation
    pub fn run(&mut self, path: Option<&str>) -> SessionState {
        let request_path = path
            .map(str::to_string)
            .unwrap_or_else(|| self.request.request_path());

        let Some(op) = self.routes.get(&request_path).copied() else {
            debug!(%request_path, "No operation for request path");
            let mut state = SessionState::new();
            state.set_service_error("Unknown operation");
            return state;
        };

        match op(self) {
            Ok(state) => state,
            Err(e) => {
                error!(%request_path, error = %e, "Operation failed");
                e.log();
                let mut state = SessionState::new();
                state.set_service_error("Operation failure");
                state
            }
        }
    }

    pub fn open_session(&mut self, new: bool, use_context: bool) -> bool {
        self.open_session_with(OpenSession {
            new,
            use_context,
            ..OpenSession::default()
        })
    }

    /// Join or create the request's session and open its data store
    pub fn open_session_with(&mut self, options: OpenSession) -> bool {
        let session = match self.request.session(options.new) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Failed to create or join session");
                return false;
            }
        };

        debug!(session_id = ?session.id(), "Session id");
        let Some(path) = session.get_path() else {
            warn!(session_id = ?session.id(), "Session directory does not exist");
            return false;
        };
        debug!("Session path {}", path.display());

        let store = KeyValueStore::with_options(
            &path,
            Some(self.store_prefix.as_str()),
            LockOptions::from(self.locks.session_store),
        );
        self.session = Some(session);
        self.session_path = Some(path);
        self.store = Some(store);

        if options.use_context && !options.new {
            let context: Vec<(String, String)> = self
                .session_store_dict()
                .into_iter()
                .map(|(k, v)| (k, context_string(&v)))
                .collect();
            debug!(count = context.len(), "Imported session context");
            self.request.set_dictionary(context, options.overwrite_context);
        }
        if options.track_history {
            self.track_session_history("begins");
        }
        true
    }

    /// Merge into the session store (see [`KeyValueStore::update`])
    pub fn append_session_store(&self, values: StoreMap) -> bool {
        if values.is_empty() {
            return true;
        }
        match &self.store {
            Some(store) => store.update(values),
            None => {
                warn!("Session store update without an open session");
                false
            }
        }
    }

    pub fn session_store_dict(&self) -> StoreMap {
        self.store
            .as_ref()
            .map(KeyValueStore::get_dictionary)
            .unwrap_or_default()
    }

    pub fn set_session_store_value(&self, key: &str, value: impl Into<StoreValue>) -> bool {
        match &self.store {
            Some(store) => store.set(key, value, true),
            None => {
                warn!(key, "Session store write without an open session");
                false
            }
        }
    }

    /// Append `[request path, local time, message]` to the session history list
    pub fn track_session_history(&self, message: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let stamp = Local::now().format("%Y %m %d %H:%M:%S").to_string();
        let entry = StoreValue::sequence([self.request.request_path(), stamp, message.to_string()]);
        store.append(SESSION_HISTORY_KEY, entry)
    }

    /// Record a status change (`created`, `submitted`, ...) for this session
    /// in the service user's history log
    pub fn track_service_status(&self, operation: &str, mut payload: Payload) -> bool {
        let Some(session_id) = self.session_id() else {
            warn!(operation, "Status tracking without a session");
            return false;
        };
        if !payload.is_empty() && !payload.contains_key(KEY_REMOTE_ADDR) {
            payload.insert(KEY_REMOTE_ADDR.to_string(), self.request.remote_addr().into());
        }
        match self.history_log() {
            Some(log) => log.add(session_id, operation, payload),
            None => false,
        }
    }

    pub fn activity_summary(&self) -> ActivitySummary {
        self.history_log()
            .map(|log| log.get_activity_summary())
            .unwrap_or_default()
    }

    /// Check the request's bearer token
    pub fn authorize(&self, verifier: &TokenVerifier) -> TokenReport {
        verifier.authorize(&self.request.authorization())
    }

    fn history_log(&self) -> Option<HistoryLog> {
        let dir = self.request.session_user_path();
        if dir.is_empty() {
            warn!("No session user path on request");
            return None;
        }
        Some(HistoryLog::with_options(dir, HistoryOptions::from(&self.locks)))
    }
}

/// Text form of a stored value for request parameters
fn context_string(value: &StoreValue) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
