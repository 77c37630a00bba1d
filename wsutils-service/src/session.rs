//! Session directory layout: `<top>/sessions/<service user>/<session id>`

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use wsutils_core::{validation_error, WsResult};

pub const DEFAULT_SERVICE_USER: &str = "ANONYMOUS";
const SESSIONS_DIR: &str = "sessions";

#[derive(Debug, Clone)]
pub struct SessionFactory {
    top_path: PathBuf,
    service_user: String,
    uid: Option<String>,
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self::new(None::<&Path>, None)
    }
}

impl SessionFactory {
    pub fn new<P: AsRef<Path>>(top_path: Option<P>, service_user: Option<&str>) -> Self {
        Self {
            top_path: top_path
                .map(|p| p.as_ref().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            service_user: service_user
                .filter(|u| !u.is_empty())
                .unwrap_or(DEFAULT_SERVICE_USER)
                .to_string(),
            uid: None,
        }
    }

    /// Fresh random session id
    pub fn assign_id(&mut self) -> &str {
        self.uid.insert(Uuid::new_v4().simple().to_string())
    }

    pub fn set_id(&mut self, uid: impl Into<String>) {
        self.uid = Some(uid.into());
    }

    pub fn id(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn top_path(&self) -> &Path {
        &self.top_path
    }

    pub fn set_top_path<P: AsRef<Path>>(&mut self, top_path: P) {
        self.top_path = top_path.as_ref().to_path_buf();
    }

    pub fn service_user(&self) -> &str {
        &self.service_user
    }

    pub fn set_service_user(&mut self, service_user: &str) {
        self.service_user = service_user.to_string();
    }

    /// Directory holding all sessions of the service user
    pub fn session_user_path(&self) -> PathBuf {
        self.top_path.join(SESSIONS_DIR).join(&self.service_user)
    }

    /// Session directory whether or not it exists
    pub fn session_path(&self) -> Option<PathBuf> {
        self.uid.as_ref().map(|uid| self.session_user_path().join(uid))
    }

    /// Session directory, only if it exists
    pub fn get_path(&self) -> Option<PathBuf> {
        let path = self.session_path()?;
        debug!("Session path {}", path.display());
        path.exists().then_some(path)
    }

    /// `/sessions/<service user>/<session id>`
    pub fn relative_path(&self) -> Option<String> {
        self.uid
            .as_ref()
            .map(|uid| format!("/{}/{}/{}", SESSIONS_DIR, self.service_user, uid))
    }

    /// Create the session directory if needed
    pub fn make_session_path(&self) -> WsResult<PathBuf> {
        let path = self.require_path()?;
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Recreate the session directory empty
    pub fn remake_session_path(&self) -> WsResult<PathBuf> {
        let path = self.require_path()?;
        match fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn require_path(&self) -> WsResult<PathBuf> {
        self.session_path()
            .ok_or_else(|| validation_error!("no session id assigned", "session_id", "session"))
    }
}

impl fmt::Display for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session top path: {}", self.top_path.display())?;
        writeln!(f, "Service user id: {}", self.service_user)?;
        writeln!(f, "Unique identifier: {}", self.uid.as_deref().unwrap_or("-"))?;
        match self.get_path() {
            Some(p) => writeln!(f, "Session path: {}", p.display()),
            None => writeln!(f, "Session path: -"),
        }
    }
}
