//! TokenStore id lifecycle and recovery

use serde_json::json;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use wsutils_core::SiteConfig;
use wsutils_store::tokens::parse_token_id;
use wsutils_store::{LockManager, LockOptions, Metadata, StoreError, TokenStore};

fn locks(dir: &Path) -> LockManager {
    LockManager::with_lock_dir(
        dir.join("locks"),
        LockOptions::new(Duration::from_secs(30), Duration::from_millis(5)),
    )
}

fn open(dir: &Path) -> TokenStore {
    TokenStore::open(dir, Some("DEP"), locks(dir)).unwrap()
}

#[test]
fn test_fetch_reuses_and_increments() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());
    assert!(store.is_empty());
    assert!(store.file_path().ends_with("DEP_TOKEN_STORE.json"));

    let a = store.fetch_token_id("a@example.org").unwrap();
    let again = store.fetch_token_id("a@example.org").unwrap();
    let b = store.fetch_token_id("b@example.org").unwrap();

    assert_eq!(a, "DEP_0000000001");
    assert_eq!(a, again);
    assert_eq!(b, "DEP_0000000002");
    assert_eq!(store.len(), 2);
    assert_eq!(store.get_token_id_email(&b), Some("b@example.org"));
    assert!(store.is_consistent());
}

#[test]
fn test_remove_clears_both_indexes() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());
    let id = store.fetch_token_id("user@example.org").unwrap();

    assert!(store.remove(&id));
    assert!(!store.token_id_exists(&id));
    assert!(!store.token_id_email_exists("user@example.org"));
    assert!(store.is_consistent());

    // Already gone
    assert!(!store.remove(&id));

    // Reopened from disk, the removal holds
    let reopened = open(dir.path());
    assert!(!reopened.token_id_exists(&id));
}

#[test]
fn test_removing_lower_id_keeps_sequence() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());
    let first = store.fetch_token_id("one@example.org").unwrap();
    let second = store.fetch_token_id("two@example.org").unwrap();
    assert!(store.remove(&first));

    let third = store.fetch_token_id("three@example.org").unwrap();
    assert_eq!(parse_token_id(&third).unwrap().1, 3);
    assert_ne!(third, second);
}

#[test]
fn test_removing_highest_id_reissues_it() {
    // Next id is max + 1 over live ids, so a removed maximum comes back
    // for the next email. Signed tokens for the old holder then name the
    // new one.
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());
    let old = store.fetch_token_id("old@example.org").unwrap();
    assert!(store.remove(&old));

    let new = store.fetch_token_id("new@example.org").unwrap();
    assert_eq!(new, old);
    assert_eq!(store.get_token_id_email(&new), Some("new@example.org"));
}

#[test]
fn test_exhausted_sequence_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());
    store
        .save_token_id("DEP_18446744073709551615", "max@example.org", Metadata::new())
        .unwrap();

    let err = store.fetch_token_id("next@example.org").unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord { .. }));
    assert!(!store.token_id_email_exists("next@example.org"));
    assert_eq!(store.len(), 1);
    assert!(store.is_consistent());
}

#[test]
fn test_failed_write_restores_from_disk() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());
    let id = store.fetch_token_id("kept@example.org").unwrap();

    // A directory where the temporary file goes makes every write fail
    let blocker = dir.path().join("DEP_TOKEN_STORE.json.tmp");
    fs::create_dir(&blocker).unwrap();

    assert!(!store.remove(&id));
    assert!(store.token_id_exists(&id));
    assert!(store.token_id_email_exists("kept@example.org"));
    assert!(store.is_consistent());

    assert!(store.fetch_token_id("lost@example.org").is_err());
    assert!(!store.token_id_email_exists("lost@example.org"));
    assert_eq!(store.len(), 1);
    assert!(store.is_consistent());

    fs::remove_dir(&blocker).unwrap();
    assert!(store.remove(&id));
    assert!(!store.token_id_exists(&id));
}

#[test]
fn test_other_process_sees_changes() {
    let dir = TempDir::new().unwrap();
    let mut writer = open(dir.path());
    let mut reader = open(dir.path());

    let id = writer.fetch_token_id("shared@example.org").unwrap();
    assert!(!reader.token_id_exists(&id));
    reader.refresh().unwrap();
    assert!(reader.token_id_exists(&id));

    // The second instance continues the sequence rather than colliding
    let next = reader.fetch_token_id("other@example.org").unwrap();
    assert_eq!(next, "DEP_0000000002");
}

#[test]
fn test_save_token_id_validation_and_metadata() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());

    let err = store
        .save_token_id("DEP_1", "valid@example.org", Metadata::new())
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord { .. }));
    assert!(store
        .save_token_id("DEP_0000000042", "ab", Metadata::new())
        .is_err());

    let mut meta = Metadata::new();
    meta.insert("name".into(), json!("Ada"));
    store
        .save_token_id("DEP_0000000042", "ada@example.org", meta)
        .unwrap();

    let reopened = open(dir.path());
    let record = reopened.get_record("DEP_0000000042").unwrap();
    assert_eq!(record.email, "ada@example.org");
    assert_eq!(record.extra["name"], "Ada");

    let mut store = reopened;
    assert_eq!(
        store.fetch_token_id("new@example.org").unwrap(),
        "DEP_0000000043"
    );
}

#[test]
fn test_corrupt_store_requires_recreation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("DEP_TOKEN_STORE.json");
    fs::write(&path, b"{\"DEP_0000000001\": ").unwrap();

    let err = TokenStore::open(dir.path(), Some("DEP"), locks(dir.path())).unwrap_err();
    assert!(matches!(err, StoreError::Deserialization { .. }));

    let mut store = TokenStore::create(&path, Some("DEP"), locks(dir.path())).unwrap();
    assert!(store.is_empty());
    assert_eq!(store.fetch_token_id("x@example.org").unwrap(), "DEP_0000000001");
}

#[test]
fn test_named_lock_held_blocks_issue() {
    let dir = TempDir::new().unwrap();
    let quick = LockManager::with_lock_dir(
        dir.path().join("locks"),
        LockOptions::new(Duration::from_millis(100), Duration::from_millis(10)),
    );
    let mut store = TokenStore::open(dir.path(), None, quick.clone()).unwrap();
    assert!(store.file_path().ends_with("ANONYMOUSWS_TOKEN_STORE.json"));
    assert_eq!(store.prefix(), "WS");

    let guard = quick.lock_named("token-store").unwrap();
    let err = store.fetch_token_id("a@example.org").unwrap_err();
    assert!(err.is_lock_timeout());
    drop(guard);

    assert_eq!(store.fetch_token_id("a@example.org").unwrap(), "WS_0000000001");
}

#[test]
fn test_from_site_layout() {
    let dir = TempDir::new().unwrap();
    let mut site = SiteConfig::rooted_at(dir.path());
    site.token.prefix = Some("SITE".to_string());

    let mut store = TokenStore::from_site(&site).unwrap();
    store.fetch_token_id("a@example.org").unwrap();
    assert!(site.registration_dir.join("SITE_TOKEN_STORE.json").exists());
}

#[test]
fn test_from_site_tolerates_unbounded_timings() {
    let dir = TempDir::new().unwrap();
    let mut site = SiteConfig::rooted_at(dir.path());
    site.locks.token_store.timeout_seconds = f64::INFINITY;
    site.locks.token_store.retry_seconds = f64::NAN;

    let mut store = TokenStore::from_site(&site).unwrap();
    assert_eq!(store.fetch_token_id("a@example.org").unwrap(), "WS_0000000001");
}

#[test]
fn test_concurrent_issuers_get_distinct_ids() {
    let dir = Arc::new(TempDir::new().unwrap());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let dir = Arc::clone(&dir);
            thread::spawn(move || {
                let mut store = open(dir.path());
                (0..5)
                    .map(|i| store.fetch_token_id(&format!("u{t}-{i}@example.org")).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for h in handles {
        ids.extend(h.join().unwrap());
    }
    assert_eq!(ids.len(), 20);

    let store = open(dir.path());
    assert_eq!(store.len(), 20);
    assert!(store.is_consistent());
    assert!(store.token_id_exists("DEP_0000000020"));
}
