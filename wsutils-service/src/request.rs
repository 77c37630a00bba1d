//! Decoded service request parameters.
//!
//! Every parameter holds a list of strings; single values live in the first
//! element.

use crate::session::SessionFactory;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use wsutils_core::WsResult;

pub type ParamMap = BTreeMap<String, Vec<String>>;

pub const KEY_RETURN_FORMAT: &str = "return_format";
pub const KEY_REQUEST_PATH: &str = "request_path";
pub const KEY_SESSION_ID: &str = "session_id";
pub const KEY_TOP_SESSION_PATH: &str = "top_session_path";
pub const KEY_SERVICE_USER_ID: &str = "service_user_id";
pub const KEY_SESSION_USER_PATH: &str = "session_user_path";
pub const KEY_SITE_ID: &str = "site_id";
pub const KEY_AUTHORIZATION: &str = "authorization";
pub const KEY_REMOTE_ADDR: &str = "remote_addr";

#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    params: ParamMap,
    return_format_default: String,
    request_prefix: String,
}

impl ServiceRequest {
    pub fn new(params: ParamMap) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Request with one value per key
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), vec![v.into()]))
                .collect(),
        )
    }

    pub fn from_json(json: &str) -> WsResult<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn to_json(&self) -> WsResult<String> {
        Ok(serde_json::to_string(&self.params)?)
    }

    pub fn dictionary(&self) -> &ParamMap {
        &self.params
    }

    pub fn exists(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// First value, trimmed; empty if absent
    pub fn value(&self, key: &str) -> String {
        self.raw_value(key).map(|v| v.trim().to_string()).unwrap_or_default()
    }

    pub fn value_or_default(&self, key: &str, default: &str) -> String {
        let v = self.value(key);
        if v.is_empty() {
            default.to_string()
        } else {
            v
        }
    }

    pub fn raw_value(&self, key: &str) -> Option<&str> {
        self.params.get(key)?.first().map(String::as_str)
    }

    pub fn int_value(&self, key: &str) -> Option<i64> {
        self.value(key).parse().ok()
    }

    pub fn float_value(&self, key: &str) -> Option<f64> {
        self.value(key).parse().ok()
    }

    pub fn value_list(&self, key: &str) -> &[String] {
        self.params.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), vec![value.into()]);
    }

    pub fn set_value_list(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.params.insert(key.into(), values);
    }

    /// Import single values; existing keys are kept unless `overwrite`
    pub fn set_dictionary<I, K, V>(&mut self, entries: I, overwrite: bool)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in entries {
            let k = k.into();
            if overwrite || !self.exists(&k) {
                self.set_value(k, v);
            }
        }
    }

    pub fn set_default_return_format(&mut self, format: &str) {
        self.return_format_default = format.to_string();
        if !self.exists(KEY_RETURN_FORMAT) {
            self.set_value(KEY_RETURN_FORMAT, format);
        }
    }

    pub fn return_format(&self) -> String {
        self.value_or_default(KEY_RETURN_FORMAT, &self.return_format_default)
    }

    pub fn set_return_format(&mut self, format: &str) {
        self.set_value(KEY_RETURN_FORMAT, format);
    }

    /// Prefix removed from the request path before routing
    pub fn set_request_path_prefix(&mut self, prefix: &str) {
        self.request_prefix = prefix.to_string();
    }

    pub fn request_path_prefix(&self) -> &str {
        &self.request_prefix
    }

    pub fn request_path(&self) -> String {
        let path = self.value(KEY_REQUEST_PATH);
        match path.strip_prefix(self.request_prefix.as_str()) {
            Some(rest) if !self.request_prefix.is_empty() => rest.to_string(),
            _ => path,
        }
    }

    pub fn session_id(&self) -> String {
        self.value(KEY_SESSION_ID)
    }

    pub fn top_session_path(&self) -> String {
        self.value(KEY_TOP_SESSION_PATH)
    }

    pub fn set_top_session_path(&mut self, path: &str) {
        self.set_value(KEY_TOP_SESSION_PATH, path);
    }

    /// `<top session path>/sessions`
    pub fn sessions_path(&self) -> String {
        format!("{}/sessions", self.top_session_path())
    }

    pub fn service_user_id(&self) -> String {
        self.value(KEY_SERVICE_USER_ID)
    }

    pub fn set_service_user_id(&mut self, user: &str) {
        self.set_value(KEY_SERVICE_USER_ID, user);
    }

    pub fn session_user_path(&self) -> String {
        self.value(KEY_SESSION_USER_PATH)
    }

    pub fn site_id(&self) -> String {
        self.value(KEY_SITE_ID)
    }

    pub fn set_site_id(&mut self, site_id: &str) {
        self.set_value(KEY_SITE_ID, site_id);
    }

    pub fn authorization(&self) -> String {
        self.value(KEY_AUTHORIZATION)
    }

    pub fn remote_addr(&self) -> String {
        self.value(KEY_REMOTE_ADDR)
    }

    /// Session for this request: a new one (id assigned, directory created,
    /// id recorded on the request) or the one named by `session_id`.
    pub fn session(&mut self, new: bool) -> WsResult<SessionFactory> {
        let top = self.top_session_path();
        let user = self.service_user_id();
        let mut factory = SessionFactory::new(
            (!top.is_empty()).then_some(top.as_str()),
            Some(user.as_str()),
        );

        if new {
            factory.assign_id();
            factory.make_session_path()?;
            let id = factory.id().unwrap_or_default().to_string();
            debug!(session_id = %id, "Creating new session");
            self.set_value(KEY_SESSION_ID, id);
        } else if self.exists(KEY_SESSION_ID) {
            let id = self.session_id();
            debug!(session_id = %id, "Joining existing session");
            factory.set_id(id);
        }

        self.set_value(
            KEY_SESSION_USER_PATH,
            factory.session_user_path().to_string_lossy(),
        );
        Ok(factory)
    }

    pub fn dump(&self) -> String {
        let mut lines = vec![" ++Service request contents:".to_string()];
        for (key, values) in &self.params {
            lines.push(format!("     - Key: {:<35}  value(s): {:?}", key, values));
        }
        lines.join("\n")
    }
}

impl fmt::Display for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}
