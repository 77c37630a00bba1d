//! File-backed stores shared by web-service worker processes.
//!
//! All stores coordinate through lock files ([`lock`]) on a shared
//! filesystem; there is no server process.

pub mod error;
pub mod history;
pub mod kv;
pub mod lock;
pub mod tokens;
pub mod value;

pub use error::{StoreError, StoreResult};
pub use history::{
    ActivitySummary, HistoryEntry, HistoryLog, HistoryOptions, HistoryView, Payload,
    SessionActivity, SessionStatus,
};
pub use kv::KeyValueStore;
pub use lock::{LockFile, LockGuard, LockManager, LockOptions};
pub use tokens::{Metadata, TokenRecord, TokenStore};
pub use value::{merge_into, MergeOutcome, StoreMap, StoreValue, ValueKind};
