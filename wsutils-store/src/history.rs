//! Append-only service session history.
//!
//! Each record is one JSON object per line in
//! `<history_dir>/history-session-store.jsonl`. Records are never rewritten;
//! the read view keeps the latest payload per (session, operation).

use crate::error::{StoreError, StoreResult};
use crate::lock::{LockManager, LockOptions};
use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};
use wsutils_core::LockConfig;

pub const HISTORY_FILE_NAME: &str = "history-session-store.jsonl";

pub const OP_CREATED: &str = "created";
pub const OP_SUBMITTED: &str = "submitted";
pub const OP_COMPLETED: &str = "completed";
pub const OP_FAILED: &str = "failed";

const TIMESTAMP_KEY: &str = "tiso";

/// Free-form key/value payload attached to a record
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// session id -> operation -> latest entry
pub type HistoryView = BTreeMap<String, BTreeMap<String, HistoryEntry>>;

/// On-disk record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "sid")]
    pub session_id: String,
    #[serde(rename = "op")]
    pub operation: String,
    /// Payload plus the `tiso` timestamp
    pub data: Payload,
}

/// Latest payload recorded for one (session, operation) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub payload: Payload,
}

impl From<HistoryRecord> for HistoryEntry {
    fn from(record: HistoryRecord) -> Self {
        let mut payload = record.data;
        let timestamp = match payload.remove(TIMESTAMP_KEY) {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Self { timestamp, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Submitted,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionActivity {
    pub session_id: String,
    pub started_at: String,
    pub status: SessionStatus,
    /// Seconds from submission to completion or failure
    pub elapsed_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub session_count: usize,
    pub submitted_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// Submitted sessions, ordered by start time
    pub session_list: Vec<SessionActivity>,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryOptions {
    pub lock: LockOptions,
    /// Read attempts when reading without the lock
    pub unlocked_retries: u32,
    pub unlocked_delay: Duration,
    /// Stamp records in UTC instead of local time
    pub use_utc: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            lock: LockOptions::new(Duration::from_secs(2), Duration::from_millis(100)),
            unlocked_retries: 5,
            unlocked_delay: Duration::from_secs(3),
            use_utc: false,
        }
    }
}

impl From<&LockConfig> for HistoryOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            lock: config.history.into(),
            unlocked_retries: config.history_unlocked_retries,
            unlocked_delay: config.history_unlocked_delay(),
            use_utc: false,
        }
    }
}

/// Why a read stopped before end of file
#[derive(Debug)]
enum ReadIssue {
    /// Partial record at EOF
    Truncated,
    /// A record that does not parse
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct HistoryLog {
    file_path: PathBuf,
    options: HistoryOptions,
    locks: LockManager,
}

impl HistoryLog {
    pub fn new<P: AsRef<Path>>(history_dir: P) -> Self {
        Self::with_options(history_dir, HistoryOptions::default())
    }

    pub fn with_options<P: AsRef<Path>>(history_dir: P, options: HistoryOptions) -> Self {
        let file_path = history_dir.as_ref().join(HISTORY_FILE_NAME);
        debug!("Service history data store path {}", file_path.display());
        Self {
            file_path,
            options,
            locks: LockManager::new(options.lock),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Append one timestamped record
    pub fn add(&self, session_id: &str, operation: &str, payload: Payload) -> bool {
        match self.try_add(session_id, operation, payload) {
            Ok(()) => true,
            Err(e) => {
                error!(session_id, operation, error = %e, "Failed to append history record");
                false
            }
        }
    }

    fn try_add(&self, session_id: &str, operation: &str, mut payload: Payload) -> StoreResult<()> {
        payload.insert(TIMESTAMP_KEY.to_string(), self.now().into());
        let record = HistoryRecord {
            session_id: session_id.to_string(),
            operation: operation.to_string(),
            data: payload,
        };

        let mut line = serde_json::to_vec(&record).map_err(|e| StoreError::Serialization {
            path: self.file_path.clone(),
            source: e,
        })?;
        line.push(b'\n');

        let _guard = self.locks.lock_file(&self.file_path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|e| StoreError::io(&self.file_path, e))?;
        file.write_all(&line)
            .map_err(|e| StoreError::io(&self.file_path, e))?;
        Ok(())
    }

    /// Latest entry per (session, operation).
    ///
    /// With `use_lock == false` the file may be mid-append; a malformed read
    /// is retried a bounded number of times, then an empty view is returned.
    pub fn get_history(&self, use_lock: bool) -> HistoryView {
        if use_lock {
            return self.locked_history();
        }

        let attempts = self.options.unlocked_retries.max(1);
        for attempt in 1..=attempts {
            match self.read_records() {
                Ok((records, None | Some(ReadIssue::Truncated))) => return build_view(records),
                Ok((_, Some(ReadIssue::Malformed(message)))) => {
                    error!(attempt, %message, "Could not parse unlocked history, retrying");
                }
                Err(e) => {
                    error!(attempt, error = %e, "Could not read unlocked history, retrying");
                }
            }
            if attempt < attempts {
                thread::sleep(self.options.unlocked_delay);
            }
        }

        error!("Could not parse history file {}, returning empty", self.file_path.display());
        HistoryView::new()
    }

    /// Entries recorded for one session
    pub fn session_history(&self, session_id: &str) -> Option<BTreeMap<String, HistoryEntry>> {
        self.locked_history().remove(session_id)
    }

    /// Counters and per-session timings derived from the history view
    pub fn get_activity_summary(&self) -> ActivitySummary {
        summarize(&self.locked_history())
    }

    fn locked_history(&self) -> HistoryView {
        let _guard = match self.locks.lock_file(&self.file_path) {
            Ok(guard) => guard,
            Err(e) => {
                error!(error = %e, "Cannot lock history file");
                return HistoryView::new();
            }
        };

        match self.read_records() {
            Ok((records, issue)) => {
                match issue {
                    Some(ReadIssue::Malformed(message)) => {
                        error!(
                            path = %self.file_path.display(),
                            %message,
                            "Deserialization failure, keeping records read so far"
                        );
                    }
                    Some(ReadIssue::Truncated) => {
                        warn!(path = %self.file_path.display(), "Ignoring partial trailing record");
                    }
                    None => {}
                }
                build_view(records)
            }
            Err(e) => {
                error!(error = %e, "Failed to read history file");
                HistoryView::new()
            }
        }
    }

    /// Read records up to EOF or the first unreadable one
    fn read_records(&self) -> StoreResult<(Vec<HistoryRecord>, Option<ReadIssue>)> {
        let file = match File::open(&self.file_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No history store in path {}", self.file_path.display());
                return Ok((Vec::new(), None));
            }
            Err(e) => return Err(StoreError::io(&self.file_path, e)),
        };

        let stream = serde_json::Deserializer::from_reader(BufReader::new(file))
            .into_iter::<HistoryRecord>();

        let mut records = Vec::new();
        for item in stream {
            match item {
                Ok(record) => records.push(record),
                Err(e) if e.is_eof() => return Ok((records, Some(ReadIssue::Truncated))),
                Err(e) if e.is_io() => return Err(StoreError::io(&self.file_path, e.into())),
                Err(e) => return Ok((records, Some(ReadIssue::Malformed(e.to_string())))),
            }
        }
        Ok((records, None))
    }

    fn now(&self) -> String {
        if self.options.use_utc {
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
        } else {
            Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)
        }
    }
}

fn build_view(records: Vec<HistoryRecord>) -> HistoryView {
    let mut view = HistoryView::new();
    for record in records {
        let session_id = record.session_id.clone();
        let operation = record.operation.clone();
        view.entry(session_id)
            .or_default()
            .insert(operation, HistoryEntry::from(record));
    }
    view
}

/// Sessions only enter `session_list` once submitted; elapsed time is
/// measured from the submitted record to the completed or failed one.
fn summarize(view: &HistoryView) -> ActivitySummary {
    let mut summary = ActivitySummary::default();

    for (session_id, ops) in view {
        let created = ops.get(OP_CREATED);
        if created.is_some() {
            summary.session_count += 1;
        }

        let Some(submitted) = ops.get(OP_SUBMITTED) else {
            continue;
        };
        summary.submitted_count += 1;

        let mut status = SessionStatus::Submitted;
        let mut elapsed_seconds = None;

        if let Some(failed) = ops.get(OP_FAILED) {
            summary.failed_count += 1;
            status = SessionStatus::Failed;
            elapsed_seconds = seconds_between(&submitted.timestamp, &failed.timestamp);
        }
        if let Some(completed) = ops.get(OP_COMPLETED) {
            summary.completed_count += 1;
            status = SessionStatus::Completed;
            elapsed_seconds = seconds_between(&submitted.timestamp, &completed.timestamp);
        }

        summary.session_list.push(SessionActivity {
            session_id: session_id.clone(),
            started_at: created.unwrap_or(submitted).timestamp.clone(),
            status,
            elapsed_seconds,
        });
    }

    summary
        .session_list
        .sort_by_cached_key(|s| (parse_timestamp(&s.started_at), s.started_at.clone()));
    summary
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    // Timestamps without an offset are read as UTC
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn seconds_between(begin: &str, end: &str) -> Option<f64> {
    let begin = parse_timestamp(begin)?;
    let end = parse_timestamp(end)?;
    Some((end - begin).num_milliseconds() as f64 / 1000.0)
}
