//! Path locks: mutual exclusion for snapshot and source mutations.
//!
//! Concurrent test cases may update artifacts in the same directory, or
//! patch the same source file, from many threads of one process and from
//! several test processes at once. Mutations therefore serialize through a
//! per-path lock with two layers:
//!
//! 1. **In-process**: a registry maps each absolutized path to an exclusive
//!    ownership gate, so only one thread of this process attempts the
//!    cross-process primitive for a given path at a time. The underlying
//!    advisory lock is not safe to contend for from multiple threads of the
//!    same process.
//! 2. **Cross-process**: an advisory `flock(2)` on a lock file in the
//!    system temp directory, named by a short hash of the absolutized path
//!    so lock file names stay bounded regardless of how deep the locked
//!    path nests.
//!
//! Acquisition blocks until both layers are held. The returned guard
//! releases both layers when dropped, on every exit path. A process that
//! dies while holding a lock leaves its lock file behind; the kernel drops
//! the advisory lock itself, so the stale file is inert and only needs
//! cleanup if it bothers anyone.
//!
//! Locks are cached for the process lifetime and are meant to be held only
//! around the mutation itself, never around rendering or diffing.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use sha2::{Digest, Sha256};

use crate::error::{RegiltError, RegiltResult};

// ============================================================================
// Path Helpers
// ============================================================================

/// Absolutize a path without requiring it to exist.
///
/// Lock identity and eviction bookkeeping key off this form, so the same
/// directory reached through different relative spellings maps to the same
/// lock.
pub(crate) fn absolute_path(path: &Path) -> RegiltResult<PathBuf> {
    std::path::absolute(path).map_err(|err| RegiltError::io(path, err))
}

/// Short fixed-length hash of an absolutized path, for lock file names and
/// scratch-area subdirectories.
pub(crate) fn short_path_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hex::encode(hasher.finalize())[..7].to_string()
}

// ============================================================================
// Lock Registry
// ============================================================================

/// One cached lock: the lock file location plus the in-process gate.
#[derive(Debug)]
struct PathLock {
    lock_path: PathBuf,
    busy: Mutex<bool>,
    available: Condvar,
}

impl PathLock {
    /// Give up in-process ownership and wake one waiter.
    fn surrender(&self) {
        if let Ok(mut busy) = self.busy.lock() {
            *busy = false;
        }
        self.available.notify_one();
    }
}

/// Registry of path locks, keyed by absolutized path.
///
/// Owned by the session; lives for the process duration.
#[derive(Debug, Default)]
pub struct PathLocks {
    registry: Mutex<HashMap<PathBuf, Arc<PathLock>>>,
}

impl PathLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        PathLocks::default()
    }

    /// Acquire the lock for `path`, blocking until it is held.
    ///
    /// The path is absolutized first; it does not need to exist. Dropping
    /// the returned guard releases the lock.
    pub fn acquire(&self, path: &Path) -> RegiltResult<PathLockGuard> {
        let abs = absolute_path(path)?;
        let lock = {
            let mut registry = self
                .registry
                .lock()
                .map_err(|_| RegiltError::lock(&abs, "lock registry poisoned"))?;
            Arc::clone(registry.entry(abs.clone()).or_insert_with(|| {
                let lock_path =
                    std::env::temp_dir().join(format!("regilt.{}", short_path_hash(&abs)));
                Arc::new(PathLock {
                    lock_path,
                    busy: Mutex::new(false),
                    available: Condvar::new(),
                })
            }))
        };

        // In-process ownership first. Only the owning thread may touch the
        // advisory lock for this path.
        {
            let mut busy = lock
                .busy
                .lock()
                .map_err(|_| RegiltError::lock(&abs, "ownership gate poisoned"))?;
            while *busy {
                busy = lock
                    .available
                    .wait(busy)
                    .map_err(|_| RegiltError::lock(&abs, "ownership gate poisoned"))?;
            }
            *busy = true;
        }

        match lock_file_exclusive(&lock.lock_path) {
            Ok(file) => {
                tracing::debug!(path = %abs.display(), lock_file = %lock.lock_path.display(), "acquired path lock");
                Ok(PathLockGuard {
                    lock,
                    file: Some(file),
                })
            }
            Err(err) => {
                lock.surrender();
                Err(RegiltError::lock(&lock.lock_path, err.to_string()))
            }
        }
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Exclusive hold on one path. Releases both lock layers on drop.
#[derive(Debug)]
pub struct PathLockGuard {
    lock: Arc<PathLock>,
    file: Option<File>,
}

impl PathLockGuard {
    /// Release explicitly, surfacing unlock errors that a drop would only
    /// log.
    pub fn release(mut self) -> RegiltResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> RegiltResult<()> {
        if let Some(file) = self.file.take() {
            let unlocked = unlock_file(&file);
            drop(file);
            self.lock.surrender();
            unlocked.map_err(|err| {
                RegiltError::lock(
                    &self.lock.lock_path,
                    format!("failed to unlock: {err} (you may need to delete the file)"),
                )
            })?;
        }
        Ok(())
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            tracing::warn!(%err, "releasing path lock failed");
        }
    }
}

// ============================================================================
// Advisory File Lock
// ============================================================================

#[cfg(unix)]
fn lock_file_exclusive(path: &Path) -> io::Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    // SAFETY: flock is a standard POSIX call on a valid descriptor owned by
    // `file`. LOCK_EX blocks until the current holder releases; the
    // in-process gate guarantees only one thread of this process waits here.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(file)
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above; LOCK_UN never blocks.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_file_exclusive(path: &Path) -> io::Result<File> {
    // No advisory locking on this platform; the in-process gate still
    // serializes threads of this process.
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) -> io::Result<()> {
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
