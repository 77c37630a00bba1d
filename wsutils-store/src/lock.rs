//! Cross-process advisory locking through an auxiliary lock file.
//!
//! The lock for `target` is the file `target + ".lock"`. Its existence is the
//! lock state: acquisition creates it with `create_new` (atomic
//! create-exclusive) and release deletes it. Every participant must go through
//! this module for the lock to mean anything.
//!
//! A process that dies while holding a lock leaves the file behind. Nothing
//! here reclaims it automatically; see [`LockFile::clear_stale`].

use crate::error::{StoreError, StoreResult};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wsutils_core::LockSettings;

pub const LOCK_SUFFIX: &str = ".lock";

/// Path of the lock file guarding `target`
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Timeout and retry interval for lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub timeout: Duration,
    pub retry: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            retry: Duration::from_millis(200),
        }
    }
}

impl LockOptions {
    pub fn new(timeout: Duration, retry: Duration) -> Self {
        Self { timeout, retry }
    }
}

impl From<LockSettings> for LockOptions {
    fn from(settings: LockSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            retry: settings.retry_interval(),
        }
    }
}

/// A lock on one target path. Dropping a held lock releases it.
#[derive(Debug)]
pub struct LockFile {
    target: PathBuf,
    lock_path: PathBuf,
    options: LockOptions,
    held: bool,
}

impl LockFile {
    pub fn new<P: AsRef<Path>>(target: P, options: LockOptions) -> Self {
        let target = target.as_ref().to_path_buf();
        let lock_path = lock_path_for(&target);
        Self {
            target,
            lock_path,
            options,
            held: false,
        }
    }

    /// Block until the lock file is created or the timeout elapses.
    ///
    /// Acquiring a lock this instance already holds is a no-op.
    pub fn acquire(&mut self) -> StoreResult<()> {
        if self.held {
            return Ok(());
        }

        let started = Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    // Holder pid helps an operator judge whether a lock is orphaned
                    if let Err(err) = writeln!(file, "{}", std::process::id()) {
                        debug!(
                            "Could not record holder pid in {}: {}",
                            self.lock_path.display(),
                            err
                        );
                    }
                    debug!("Lock file created {}", self.lock_path.display());
                    self.held = true;
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= self.options.timeout {
                        debug!(
                            "Failed to acquire lock {} within {:?}",
                            self.lock_path.display(),
                            self.options.timeout
                        );
                        return Err(StoreError::LockTimeout {
                            path: self.target.clone(),
                            timeout: self.options.timeout,
                        });
                    }
                    debug!("Lock file retry for {}", self.lock_path.display());
                    thread::sleep(self.options.retry);
                }
                Err(err) => {
                    return Err(StoreError::LockIo {
                        path: self.lock_path.clone(),
                        source: err,
                    });
                }
            }
        }
    }

    /// Remove the lock file. Releasing a lock that is not held is a no-op.
    pub fn release(&mut self) -> StoreResult<()> {
        if !self.held {
            return Ok(());
        }

        match fs::remove_file(&self.lock_path) {
            Ok(()) => {
                self.held = false;
                debug!("Removed lock file {}", self.lock_path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.held = false;
                warn!(
                    "Lock file {} vanished while held",
                    self.lock_path.display()
                );
                Ok(())
            }
            // Still held, so a later release or drop retries the removal
            Err(err) => Err(StoreError::LockIo {
                path: self.lock_path.clone(),
                source: err,
            }),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.held
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Whether some holder currently owns the lock for `target`
    pub fn exists<P: AsRef<Path>>(target: P) -> bool {
        lock_path_for(target.as_ref()).exists()
    }

    /// Pid recorded by the current holder, if readable
    pub fn holder_pid<P: AsRef<Path>>(target: P) -> Option<u32> {
        fs::read_to_string(lock_path_for(target.as_ref()))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Delete a lock file left behind by a crashed holder.
    ///
    /// Operator tool: calling this while a live holder exists breaks mutual
    /// exclusion. Returns whether a file was removed.
    pub fn clear_stale<P: AsRef<Path>>(target: P) -> StoreResult<bool> {
        let lock_path = lock_path_for(target.as_ref());
        match fs::remove_file(&lock_path) {
            Ok(()) => {
                warn!("Cleared lock file {}", lock_path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::LockIo {
                path: lock_path,
                source: err,
            }),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release lock on drop: {}", e);
        }
    }
}

/// Scoped lock: acquired on construction, released on drop
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    lock: LockFile,
}

impl LockGuard {
    pub fn acquire<P: AsRef<Path>>(target: P, options: LockOptions) -> StoreResult<Self> {
        let mut lock = LockFile::new(target, options);
        lock.acquire()?;
        Ok(Self { lock })
    }

    /// Release early, surfacing any error that drop would only log
    pub fn release(mut self) -> StoreResult<()> {
        self.lock.release()
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.lock_path()
    }
}

/// Issues locks for stores, keyed by data-file path or by logical name.
///
/// Each store owns one. Named locks live in `lock_dir`, so every manager
/// pointing at the same directory (in any process) shares them.
#[derive(Debug, Clone)]
pub struct LockManager {
    lock_dir: Option<PathBuf>,
    options: LockOptions,
}

impl LockManager {
    /// Manager for per-file locks only
    pub fn new(options: LockOptions) -> Self {
        Self {
            lock_dir: None,
            options,
        }
    }

    /// Manager that also serves named locks under `lock_dir`
    pub fn with_lock_dir<P: AsRef<Path>>(lock_dir: P, options: LockOptions) -> Self {
        Self {
            lock_dir: Some(lock_dir.as_ref().to_path_buf()),
            options,
        }
    }

    pub fn options(&self) -> LockOptions {
        self.options
    }

    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    /// Lock colocated with a data file
    pub fn lock_file<P: AsRef<Path>>(&self, target: P) -> StoreResult<LockGuard> {
        LockGuard::acquire(target, self.options)
    }

    /// Lock identified by a logical operation name
    pub fn lock_named(&self, name: &str) -> StoreResult<LockGuard> {
        let target = self.named_target(name)?;
        LockGuard::acquire(target, self.options)
    }

    /// Run `f` while holding the lock for `target`
    pub fn with_file_lock<P, T, F>(&self, target: P, f: F) -> StoreResult<T>
    where
        P: AsRef<Path>,
        F: FnOnce() -> T,
    {
        let _guard = self.lock_file(target)?;
        Ok(f())
    }

    /// Run `f` while holding the named lock
    pub fn with_named_lock<T, F>(&self, name: &str, f: F) -> StoreResult<T>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.lock_named(name)?;
        Ok(f())
    }

    fn named_target(&self, name: &str) -> StoreResult<PathBuf> {
        let dir = self.lock_dir.as_ref().ok_or_else(|| {
            StoreError::invalid_record(format!("no lock directory for named lock '{}'", name))
        })?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        Ok(dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick() -> LockOptions {
        LockOptions::new(Duration::from_millis(150), Duration::from_millis(10))
    }

    #[test]
    fn test_lock_path_appends_suffix() {
        let p = lock_path_for(Path::new("/tmp/data/general-session-store.json"));
        assert_eq!(p, PathBuf::from("/tmp/data/general-session-store.json.lock"));
    }

    #[test]
    fn test_failed_release_stays_held() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data");
        let mut lock = LockFile::new(&target, quick());
        lock.acquire().unwrap();

        // A directory in place of the lock file makes removal fail
        let lock_path = lock.lock_path().to_path_buf();
        fs::remove_file(&lock_path).unwrap();
        fs::create_dir(&lock_path).unwrap();
        fs::write(lock_path.join("busy"), b"x").unwrap();

        assert!(matches!(lock.release(), Err(StoreError::LockIo { .. })));
        assert!(lock.is_locked());

        fs::remove_dir_all(&lock_path).unwrap();
        fs::write(&lock_path, b"1").unwrap();
        lock.release().unwrap();
        assert!(!lock.is_locked());
        assert!(!LockFile::exists(&target));
    }

    #[test]
    fn test_acquire_release_cycle() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data");
        let mut lock = LockFile::new(&target, quick());

        assert!(!LockFile::exists(&target));
        lock.acquire().unwrap();
        assert!(lock.is_locked());
        assert!(LockFile::exists(&target));
        assert_eq!(LockFile::holder_pid(&target), Some(std::process::id()));

        // Re-acquire by the same holder is a no-op
        lock.acquire().unwrap();

        lock.release().unwrap();
        assert!(!lock.is_locked());
        assert!(!LockFile::exists(&target));

        // Release when not held is a no-op
        lock.release().unwrap();
    }

    #[test]
    fn test_second_holder_times_out() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data");
        let _held = LockGuard::acquire(&target, quick()).unwrap();

        let started = Instant::now();
        let err = LockGuard::acquire(&target, quick()).unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data");
        {
            let guard = LockGuard::acquire(&target, quick()).unwrap();
            assert!(guard.lock_path().exists());
        }
        assert!(!LockFile::exists(&target));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("no-such-dir").join("data");
        let err = LockGuard::acquire(&target, quick()).unwrap_err();
        assert!(matches!(err, StoreError::LockIo { .. }));
    }

    #[test]
    fn test_named_lock_requires_directory() {
        let manager = LockManager::new(quick());
        assert!(manager.lock_named("token-store").is_err());

        let dir = TempDir::new().unwrap();
        let manager = LockManager::with_lock_dir(dir.path().join("locks"), quick());
        let value = manager.with_named_lock("token-store", || {
            assert!(dir.path().join("locks").join("token-store.lock").exists());
            7
        });
        assert_eq!(value.unwrap(), 7);
        assert!(!dir.path().join("locks").join("token-store.lock").exists());
    }

    #[test]
    fn test_clear_stale_lock() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data");
        std::fs::write(lock_path_for(&target), "99999\n").unwrap();

        assert!(LockGuard::acquire(&target, quick()).is_err());
        assert!(LockFile::clear_stale(&target).unwrap());
        assert!(!LockFile::clear_stale(&target).unwrap());
        assert!(LockGuard::acquire(&target, quick()).is_ok());
    }
}
