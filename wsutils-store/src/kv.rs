//! Session key/value store.
//!
//! One JSON mapping per store at `<session_path>/<prefix>-session-store.json`.
//! Every operation takes the file lock, reloads the whole mapping from disk,
//! applies its change and rewrites the file before releasing the lock. No
//! in-memory copy outlives a call, so several processes can share a store.
//!
//! Failures never reach the caller as errors: mutators log and return
//! `false`, readers log and return empty results.

use crate::error::{StoreError, StoreResult};
use crate::lock::{LockManager, LockOptions};
use crate::value::{merge_into, MergeOutcome, StoreMap, StoreValue};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_PREFIX: &str = "general";
const STORE_FILE_SUFFIX: &str = "-session-store.json";

/// Lock timing used when the caller does not supply any
pub fn default_lock_options() -> LockOptions {
    LockOptions::new(Duration::from_secs(8), Duration::from_millis(200))
}

#[derive(Debug, Clone)]
pub struct KeyValueStore {
    session_path: PathBuf,
    file_path: PathBuf,
    locks: LockManager,
}

impl KeyValueStore {
    pub fn new<P: AsRef<Path>>(session_path: P, prefix: Option<&str>) -> Self {
        Self::with_options(session_path, prefix, default_lock_options())
    }

    pub fn with_options<P: AsRef<Path>>(
        session_path: P,
        prefix: Option<&str>,
        options: LockOptions,
    ) -> Self {
        let session_path = session_path.as_ref().to_path_buf();
        let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
        let file_path = session_path.join(format!("{}{}", prefix, STORE_FILE_SUFFIX));
        debug!("Session data store path {}", file_path.display());

        Self {
            session_path,
            file_path,
            locks: LockManager::new(options),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    /// Value for `key`, or the empty-string sentinel if absent or unreadable
    pub fn get(&self, key: &str) -> StoreValue {
        self.lookup(key).unwrap_or_else(StoreValue::empty)
    }

    /// Value for `key`, distinguishing absence from an empty string
    pub fn lookup(&self, key: &str) -> Option<StoreValue> {
        self.read("get", |mut map| map.remove(key)).flatten()
    }

    pub fn get_dictionary(&self) -> StoreMap {
        self.read("get_dictionary", |map| map).unwrap_or_default()
    }

    /// Store `value` under `key`. With `overwrite == false` an existing key is
    /// left untouched and `false` is returned.
    pub fn set(&self, key: &str, value: impl Into<StoreValue>, overwrite: bool) -> bool {
        let value = value.into();
        self.mutate("set", |map| {
            if !overwrite && map.contains_key(key) {
                debug!(key, "Key exists, not overwriting");
                return false;
            }
            map.insert(key.to_string(), value);
            true
        })
    }

    /// Insert absent keys; merge into present ones per [`merge_into`]
    pub fn update(&self, mapping: StoreMap) -> bool {
        self.mutate("update", |map| {
            for (key, value) in mapping {
                match map.get_mut(&key) {
                    None => {
                        map.insert(key, value);
                    }
                    Some(existing) => {
                        if merge_into(existing, value) == MergeOutcome::Skipped {
                            debug!(key = %key, "Update skipped for mismatched value kinds");
                        }
                    }
                }
            }
            true
        })
    }

    /// Overwrite every given key
    pub fn update_all(&self, mapping: StoreMap) -> bool {
        self.mutate("update_all", |map| {
            map.extend(mapping);
            true
        })
    }

    pub fn append(&self, key: &str, value: impl Into<StoreValue>) -> bool {
        let value = value.into();
        self.mutate("append", |map| match sequence_entry(map, key) {
            Some(items) => {
                items.push(value);
                true
            }
            None => false,
        })
    }

    pub fn extend<I, T>(&self, key: &str, values: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: Into<StoreValue>,
    {
        let values: Vec<StoreValue> = values.into_iter().map(Into::into).collect();
        self.mutate("extend", |map| match sequence_entry(map, key) {
            Some(items) => {
                items.extend(values);
                true
            }
            None => false,
        })
    }

    /// Key-sorted listing of the current contents
    pub fn dump(&self) -> String {
        let map = self.get_dictionary();
        let mut lines = vec!["Session data store contents:".to_string()];
        for (key, value) in &map {
            lines.push(format!("     - Key: {:<35}  value(s): {}", key, value));
        }
        lines.join("\n")
    }

    fn read<T>(&self, operation: &str, f: impl FnOnce(StoreMap) -> T) -> Option<T> {
        match self.locks.lock_file(&self.file_path) {
            Ok(_guard) => Some(f(self.load())),
            Err(e) => {
                error!(operation, path = %self.file_path.display(), error = %e, "Session store read failed");
                None
            }
        }
    }

    fn mutate(&self, operation: &str, f: impl FnOnce(&mut StoreMap) -> bool) -> bool {
        match self.try_mutate(f) {
            Ok(changed) => changed,
            Err(e) => {
                error!(operation, path = %self.file_path.display(), error = %e, "Session store update failed");
                false
            }
        }
    }

    fn try_mutate(&self, f: impl FnOnce(&mut StoreMap) -> bool) -> StoreResult<bool> {
        let _guard = self.locks.lock_file(&self.file_path)?;
        let mut map = self.load();
        if !f(&mut map) {
            return Ok(false);
        }
        self.persist(&map)?;
        Ok(true)
    }

    /// Read the mapping; a missing or corrupt file reads as empty
    fn load(&self) -> StoreMap {
        let bytes = match fs::read(&self.file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No data store in path {}", self.file_path.display());
                return StoreMap::new();
            }
            Err(e) => {
                warn!("Cannot read data store {}: {}", self.file_path.display(), e);
                return StoreMap::new();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                error!("Deserialization failure with file {}: {}", self.file_path.display(), e);
                StoreMap::new()
            }
        }
    }

    fn persist(&self, map: &StoreMap) -> StoreResult<()> {
        let data = serde_json::to_vec_pretty(map).map_err(|e| StoreError::Serialization {
            path: self.file_path.clone(),
            source: e,
        })?;
        write_replacing(&self.file_path, &data)?;
        if let Some(status) = map.get("status") {
            debug!(session = %self.session_path.display(), %status, "Wrote status value");
        }
        Ok(())
    }
}

impl fmt::Display for KeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}

/// Sequence stored under `key`, created empty if absent. `None` if the key
/// holds something else.
fn sequence_entry<'a>(map: &'a mut StoreMap, key: &str) -> Option<&'a mut Vec<StoreValue>> {
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| StoreValue::Sequence(Vec::new()));
    match entry {
        StoreValue::Sequence(items) => Some(items),
        other => {
            warn!(key, kind = ?other.kind(), "Value is not a sequence");
            None
        }
    }
}

/// Write to a sibling temp file, then rename over `path`
pub(crate) fn write_replacing(path: &Path, data: &[u8]) -> StoreResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, data).map_err(|e| StoreError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })
}
