//! Golden artifact store: persist, retrieve, and evict snapshot artifacts.
//!
//! An artifact holds the last accepted textual form of a value, one file
//! per test case at `<dir>/<sanitized name>.golden`. Path separators in
//! test names are flattened so a nested case name still maps to one file.
//!
//! ## Eviction
//!
//! A full update run prunes artifacts that no test referenced this run.
//! The first touch of a directory moves every artifact in it to a scratch
//! area outside the working tree; each subsequent load for that directory
//! restores its artifact back into place before reading. Whatever is left
//! in the scratch area when the process ends was referenced by no test and
//! is discarded with it.
//!
//! Eviction runs at most once per directory per process, and callers must
//! hold the directory's path lock across `evict` and any `load`/`store`
//! in an evicting run, so two cases first-touching the same directory
//! serialize.
//!
//! The scratch area is created lazily with a recognizable prefix; creating
//! it also sweeps leftover scratch directories from previous crashed runs.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use globset::{Glob, GlobMatcher};
use tempfile::TempDir;

use crate::error::{RegiltError, RegiltResult};
use crate::lock::short_path_hash;

/// File extension of snapshot artifacts.
pub const ARTIFACT_EXTENSION: &str = "golden";

const SCRATCH_PREFIX: &str = "regilt-scratch-";

/// Flatten path separators in a test name so it maps to one artifact file.
pub fn sanitize_name(name: &str) -> String {
    name.replace(['/', '\\'], "__")
}

// ============================================================================
// Store
// ============================================================================

/// File-backed store for golden artifacts.
///
/// Owned by the session; eviction memory and the scratch area live for the
/// process duration unless reset for test isolation.
pub struct GoldenStore {
    matcher: GlobMatcher,
    scratch: Mutex<Option<TempDir>>,
    evicted: Mutex<HashSet<PathBuf>>,
}

impl Default for GoldenStore {
    fn default() -> Self {
        GoldenStore::new()
    }
}

impl GoldenStore {
    /// Create a store with no eviction history.
    pub fn new() -> Self {
        let pattern = format!("*.{ARTIFACT_EXTENSION}");
        GoldenStore {
            matcher: Glob::new(&pattern)
                .expect("static artifact pattern is valid")
                .compile_matcher(),
            scratch: Mutex::new(None),
            evicted: Mutex::new(HashSet::new()),
        }
    }

    /// The artifact path for a test case.
    pub fn artifact_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.{ARTIFACT_EXTENSION}", sanitize_name(name)))
    }

    /// Load the artifact for `name` under `dir`.
    ///
    /// A missing artifact is `Ok(None)`: comparison treats it as an empty
    /// baseline. If `dir` was evicted this run, the scratch area is checked
    /// first and a found artifact is restored into place, which is why
    /// evicting runs call this while holding the directory lock.
    pub fn load(&self, dir: &Path, name: &str) -> RegiltResult<Option<Vec<u8>>> {
        let path = self.artifact_path(dir, name);
        if self.was_evicted(dir)? {
            self.restore(dir, &path)?;
        }
        match fs::read(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RegiltError::io(&path, err)),
        }
    }

    /// Write the artifact for `name` under `dir`, creating parent
    /// directories as needed.
    pub fn store(&self, dir: &Path, name: &str, content: &[u8]) -> RegiltResult<()> {
        let path = self.artifact_path(dir, name);
        fs::create_dir_all(dir).map_err(|err| RegiltError::io(dir, err))?;
        fs::write(&path, content).map_err(|err| RegiltError::io(&path, err))?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "stored artifact");
        Ok(())
    }

    /// Delete the artifact for `name` under `dir`, if present.
    pub fn remove(&self, dir: &Path, name: &str) -> RegiltResult<()> {
        let path = self.artifact_path(dir, name);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed artifact");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RegiltError::io(&path, err)),
        }
    }

    /// Move every artifact in `dir` to the scratch area.
    ///
    /// First-touch only: repeated calls for the same directory are no-ops,
    /// so restored artifacts are not re-evicted. The caller must hold the
    /// directory's path lock.
    pub fn evict(&self, dir: &Path) -> RegiltResult<()> {
        {
            let mut evicted = self
                .evicted
                .lock()
                .map_err(|_| RegiltError::lock(dir, "eviction registry poisoned"))?;
            if !evicted.insert(dir.to_path_buf()) {
                return Ok(());
            }
        }

        let scratch_dir = self.scratch_subdir(dir)?;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            // Nothing recorded yet for this directory.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(RegiltError::io(dir, err)),
        };

        for entry in entries {
            let entry = entry.map_err(|err| RegiltError::io(dir, err))?;
            let path = entry.path();
            let Some(file_name) = path.file_name() else {
                continue;
            };
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && self.matcher.is_match(file_name) {
                fs::rename(&path, scratch_dir.join(file_name))
                    .map_err(|err| RegiltError::io(&path, err))?;
                tracing::debug!(path = %path.display(), "evicted artifact");
            }
        }
        Ok(())
    }

    /// Forget eviction history and discard the scratch area.
    ///
    /// Exposed for test isolation only; a real run keeps both for the
    /// process duration.
    pub fn reset(&self) {
        if let Ok(mut evicted) = self.evicted.lock() {
            evicted.clear();
        }
        if let Ok(mut scratch) = self.scratch.lock() {
            *scratch = None;
        }
    }

    fn was_evicted(&self, dir: &Path) -> RegiltResult<bool> {
        let evicted = self
            .evicted
            .lock()
            .map_err(|_| RegiltError::lock(dir, "eviction registry poisoned"))?;
        Ok(evicted.contains(dir))
    }

    /// Restore `dest`'s artifact from the scratch area, if it is there.
    fn restore(&self, dir: &Path, dest: &Path) -> RegiltResult<()> {
        let scratch = self
            .scratch
            .lock()
            .map_err(|_| RegiltError::lock(dir, "scratch area poisoned"))?;
        let Some(scratch) = scratch.as_ref() else {
            return Ok(());
        };
        let Some(file_name) = dest.file_name() else {
            return Ok(());
        };
        let src = scratch.path().join(short_path_hash(dir)).join(file_name);
        match fs::rename(&src, dest) {
            Ok(()) => {
                tracing::debug!(path = %dest.display(), "restored artifact from scratch");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RegiltError::io(&src, err)),
        }
    }

    /// The scratch subdirectory for `dir`, creating the scratch area (and
    /// sweeping stale ones) on first use.
    fn scratch_subdir(&self, dir: &Path) -> RegiltResult<PathBuf> {
        let mut scratch = self
            .scratch
            .lock()
            .map_err(|_| RegiltError::lock(dir, "scratch area poisoned"))?;
        let root = match scratch.as_ref() {
            Some(tmp) => tmp.path().to_path_buf(),
            None => {
                sweep_stale_scratch_dirs();
                let created = tempfile::Builder::new()
                    .prefix(SCRATCH_PREFIX)
                    .tempdir()
                    .map_err(|err| RegiltError::io(&std::env::temp_dir(), err))?;
                let root = created.path().to_path_buf();
                *scratch = Some(created);
                root
            }
        };
        drop(scratch);

        let subdir = root.join(short_path_hash(dir));
        fs::create_dir_all(&subdir).map_err(|err| RegiltError::io(&subdir, err))?;
        Ok(subdir)
    }
}

/// How old a leftover scratch directory must be before the sweep removes
/// it. Guards against deleting the scratch area of a run that is still in
/// flight.
const SCRATCH_STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// Remove scratch directories left behind by previous crashed runs.
fn sweep_stale_scratch_dirs() {
    let temp = std::env::temp_dir();
    let Ok(entries) = fs::read_dir(&temp) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age >= SCRATCH_STALE_AFTER)
            .unwrap_or(false);
        if stale {
            if let Err(err) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(path = %entry.path().display(), %err, "sweeping stale scratch dir failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
