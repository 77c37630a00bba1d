//! Outcome of one service operation

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

pub const FORMAT_JSON: &str = "json";
pub const FORMAT_FILES: &str = "files";

/// File staged for upload or download
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileItem {
    pub name: String,
    pub path: PathBuf,
    pub content_type: Option<String>,
    pub checksum: Option<String>,
}

impl FileItem {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            content_type: None,
            checksum: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub service_name: String,
    pub service_args: String,
    pub status_text: String,
    pub error_message: String,
    pub warning_message: String,
    pub response_format: String,
    pub error_flag: bool,
    pub warning_flag: bool,
    pub app_data: Map<String, Value>,
    pub uploads: Vec<FileItem>,
    pub downloads: Vec<FileItem>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Merge `data` into the app data and set the response format
    pub fn set_app_data_dict(&mut self, data: Map<String, Value>, error_flag: bool, format: &str) {
        self.response_format = format.to_string();
        self.error_flag = error_flag;
        self.app_data.extend(data);
    }

    pub fn set_app_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.app_data.insert(key.into(), value.into());
    }

    pub fn set_upload(&mut self, item: FileItem) {
        self.uploads.push(item);
    }

    /// Queue a file for download; the response becomes a file response
    pub fn set_download(&mut self, item: FileItem) {
        self.downloads.push(item);
        self.response_format = FORMAT_FILES.to_string();
    }

    pub fn assign(&mut self, name: Option<&str>, args: Option<&str>, completed: Option<bool>) {
        if let Some(name) = name {
            self.service_name = name.to_string();
        }
        if let Some(args) = args {
            self.service_args = args.to_string();
        }
        if let Some(completed) = completed {
            self.set_completion_flag(completed);
        }
    }

    pub fn set_completion_flag(&mut self, completed: bool) {
        self.error_flag = !completed;
    }

    pub fn set_service_error(&mut self, message: impl Into<String>) {
        self.error_flag = true;
        self.error_message = message.into();
        self.response_format = FORMAT_JSON.to_string();
    }

    pub fn set_service_warning(&mut self, message: impl Into<String>) {
        self.warning_flag = true;
        self.warning_message = message.into();
        self.response_format = FORMAT_JSON.to_string();
    }

    pub fn set_status_text(&mut self, text: impl Into<String>) {
        self.status_text = text.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_and_clear() {
        let mut state = SessionState::new();
        state.assign(Some("upload"), Some("--fast"), Some(true));
        assert!(!state.error_flag);

        state.set_service_error("Unknown operation");
        assert!(state.error_flag);
        assert_eq!(state.response_format, FORMAT_JSON);

        state.clear();
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn test_app_data_and_files() {
        let mut state = SessionState::new();
        state.set_app_data("a", 1);
        let extra = json!({"b": "two"}).as_object().cloned().unwrap();
        state.set_app_data_dict(extra, false, "json");
        assert_eq!(state.app_data["a"], 1);
        assert_eq!(state.app_data["b"], "two");

        state.set_download(FileItem::new("x.cif", "/tmp/x.cif").with_content_type("text/plain"));
        assert_eq!(state.response_format, FORMAT_FILES);
        assert_eq!(state.downloads.len(), 1);
    }
}
