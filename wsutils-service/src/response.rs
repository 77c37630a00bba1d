//! Response content assembled by a service operation

use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnFormat {
    Html,
    Text,
    Json,
    /// JSON wrapped in a `<textarea>` for iframe uploads
    JsonText,
    JsonData,
    Location,
}

impl ReturnFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ReturnFormat::Html => "html",
            ReturnFormat::Text => "text",
            ReturnFormat::Json => "json",
            ReturnFormat::JsonText => "jsonText",
            ReturnFormat::JsonData => "jsonData",
            ReturnFormat::Location => "location",
        }
    }

    fn is_json(self) -> bool {
        matches!(
            self,
            ReturnFormat::Json | ReturnFormat::JsonText | ReturnFormat::JsonData
        )
    }
}

impl FromStr for ReturnFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html" => Ok(ReturnFormat::Html),
            "text" => Ok(ReturnFormat::Text),
            "json" => Ok(ReturnFormat::Json),
            "jsonText" => Ok(ReturnFormat::JsonText),
            "jsonData" => Ok(ReturnFormat::JsonData),
            "location" => Ok(ReturnFormat::Location),
            other => Err(format!("unsupported return format '{}'", other)),
        }
    }
}

impl fmt::Display for ReturnFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the web layer sends back
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedResponse {
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ServiceResponse {
    return_format: ReturnFormat,
    inject_status: bool,
    html_content: String,
    html_link_content: String,
    text_content: String,
    location: String,
    data: Value,
    error_flag: bool,
    status_text: String,
    status_code: u16,
}

impl Default for ServiceResponse {
    fn default() -> Self {
        Self::new(ReturnFormat::Json)
    }
}

impl ServiceResponse {
    pub fn new(return_format: ReturnFormat) -> Self {
        Self {
            return_format,
            inject_status: true,
            html_content: String::new(),
            html_link_content: String::new(),
            text_content: String::new(),
            location: String::new(),
            data: Value::Object(Map::new()),
            error_flag: false,
            status_text: String::new(),
            status_code: 200,
        }
    }

    /// Whether error responses copy `statustext`/`errorflag` into JSON data
    pub fn with_inject_status(mut self, inject: bool) -> Self {
        self.inject_status = inject;
        self
    }

    pub fn return_format(&self) -> ReturnFormat {
        self.return_format
    }

    /// Accepts the format names used on the wire; unknown names are ignored
    pub fn set_return_format(&mut self, format: &str) -> bool {
        match format.parse() {
            Ok(f) => {
                self.return_format = f;
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_flag
    }

    pub fn set_error(&mut self, status_code: u16, message: impl Into<String>) {
        self.error_flag = true;
        self.status_text = message.into();
        self.status_code = status_code;
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn set_html_list<S: AsRef<str>>(&mut self, lines: &[S]) {
        self.html_content = join_lines(lines);
    }

    pub fn append_html_list<S: AsRef<str>>(&mut self, lines: &[S]) {
        let more = join_lines(lines);
        if self.html_content.is_empty() {
            self.html_content = more;
        } else {
            self.html_content.push('\n');
            self.html_content.push_str(&more);
        }
    }

    pub fn set_html_text(&mut self, html: impl Into<String>) {
        self.html_content = html.into();
    }

    pub fn set_html_link_text(&mut self, html: impl Into<String>) {
        self.html_link_content = html.into();
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text_content = text.into();
    }

    pub fn set_location(&mut self, url: impl Into<String>) {
        self.location = url.into();
    }

    /// Use a file's contents as the text body; a missing file is ignored
    pub fn set_text_file<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();
        if !path.exists() {
            return false;
        }
        match fs::read_to_string(path) {
            Ok(text) => {
                self.text_content = text;
                true
            }
            Err(e) => {
                error!("Text file read failed {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn render(&self) -> RenderedResponse {
        let (content_type, body) = if self.error_flag {
            self.render_error()
        } else {
            self.render_content()
        };
        RenderedResponse {
            status_code: self.status_code,
            content_type: content_type.to_string(),
            body,
        }
    }

    fn render_error(&self) -> (&'static str, String) {
        match self.return_format {
            f if f.is_json() => {
                let mut data = self.data.clone();
                if self.inject_status {
                    if let Value::Object(map) = &mut data {
                        map.entry("statustext")
                            .or_insert_with(|| Value::from(self.status_text.as_str()));
                        map.entry("errorflag").or_insert(Value::Bool(true));
                    }
                }
                ("application/json", data.to_string())
            }
            ReturnFormat::Html | ReturnFormat::Location => {
                ("text/html", self.status_text.clone())
            }
            _ => ("text/plain", self.status_text.clone()),
        }
    }

    fn render_content(&self) -> (&'static str, String) {
        match self.return_format {
            ReturnFormat::Html => ("text/html", self.html_content.clone()),
            ReturnFormat::Text => ("text/plain", self.text_content.clone()),
            ReturnFormat::Location => ("location", self.location.clone()),
            ReturnFormat::JsonText => ("text/html", format!("<textarea>{}</textarea>", self.data)),
            ReturnFormat::Json | ReturnFormat::JsonData => {
                ("application/json", self.data.to_string())
            }
        }
    }

    /// Non-empty fields, each value cut to `max_len` characters
    pub fn dump(&self, max_len: usize) -> String {
        let fields = [
            ("returnformat", self.return_format.to_string()),
            ("htmlcontent", self.html_content.clone()),
            ("htmllinkcontent", self.html_link_content.clone()),
            ("textcontent", self.text_content.clone()),
            ("location", self.location.clone()),
            ("datacontent", self.data.to_string()),
            ("errorflag", self.error_flag.to_string()),
            ("statustext", self.status_text.clone()),
            ("statuscode", self.status_code.to_string()),
        ];

        let mut lines = vec!["Service response object:".to_string()];
        for (key, value) in fields {
            if value.trim().is_empty() {
                continue;
            }
            let shown: String = value.chars().take(max_len).collect();
            lines.push(format!("  - key = {:<35} - value(1-{}): {}", key, max_len, shown));
        }
        lines.join("\n")
    }
}

fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<&str>>()
        .join("\n")
}
