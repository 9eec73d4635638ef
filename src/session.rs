//! Session: process-scoped state and the reconciliation driver.
//!
//! A [`Session`] is constructed once per test process and passed by
//! reference to every check. It owns all the state the engine accumulates
//! over a run: the path-lock registry, the artifact store's eviction
//! memory, the per-file change ledgers, and the package display name
//! cache. Its lifetime is the process duration; [`Session::reset`] exists
//! for test isolation only.
//!
//! ## Reconciliation
//!
//! Every check walks the same state machine: render the value, load the
//! baseline (a golden artifact or the in-source recorded value), and diff.
//!
//! - An empty diff passes, with no side effects.
//! - A non-empty diff without update mode fails the case, reporting the
//!   diff.
//! - A non-empty diff under update mode acquires the path lock, rewrites
//!   the expectation (artifact write/delete, or source patch), releases
//!   the lock, and still fails the case unless the no-update-fail flag is
//!   set, so a rewritten run is visible in the exit status.
//!
//! Locks are held only around mutations. Rendering and diffing never
//! block on a lock, and a full update run acquires the directory lock
//! before its first-touch eviction so concurrent first touches serialize.

use std::collections::HashMap;
use std::fs;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::diff::{DiffText, LineDiff};
use crate::error::{RegiltError, RegiltResult};
use crate::flags::RunFlags;
use crate::format::{Reformat, Rustfmt};
use crate::locate::{locate, Disambiguator};
use crate::lock::{absolute_path, PathLocks};
use crate::patch::{Edit, FileChangeSet};
use crate::render::{Render, RenderContext};
use crate::store::GoldenStore;

// ============================================================================
// Check Inputs
// ============================================================================

/// An in-source expectation: where its site is found and what it recorded.
///
/// Usually constructed through the [`expected!`](crate::expected) macro,
/// which captures the invocation line for line-addressed sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    by: Disambiguator,
    value: String,
}

impl Expected {
    /// Line-addressed expectation at the caller's location.
    #[track_caller]
    pub fn here(value: impl Into<String>) -> Self {
        Expected {
            by: Disambiguator::Line(Location::caller().line()),
            value: value.into(),
        }
    }

    /// Line-addressed expectation at an explicit line.
    pub fn on_line(line: u32, value: impl Into<String>) -> Self {
        Expected {
            by: Disambiguator::Line(line),
            value: value.into(),
        }
    }

    /// Label-addressed expectation. The label must be unique within the
    /// test function and appear as a string literal in the source.
    pub fn labeled(label: impl Into<String>, value: impl Into<String>) -> Self {
        Expected {
            by: Disambiguator::Label(label.into()),
            value: value.into(),
        }
    }

    /// The recorded expectation text.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// How the site is identified within its function.
    pub fn disambiguator(&self) -> &Disambiguator {
        &self.by
    }
}

/// Declare an in-source expectation at the call site.
///
/// `expected!(value)` identifies its site by the line the invocation
/// starts on; `expected!("label", value)` by a label that must be unique
/// within the test function. The label must be a string literal.
#[macro_export]
macro_rules! expected {
    ($label:literal, $value:expr $(,)?) => {
        $crate::Expected::labeled($label, $value)
    };
    ($value:expr $(,)?) => {
        $crate::Expected::here($value)
    };
}

/// Per-check overrides for golden artifact placement.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Artifact name to use instead of the test name.
    pub name: Option<String>,
    /// Directory to use instead of the session's golden directory.
    pub dir: Option<PathBuf>,
}

/// How one check ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Baseline and value agree; nothing was touched.
    Passed,
    /// The expectation was rewritten to the new value.
    Updated { diff: String },
    /// Baseline and value disagree and update mode is inactive.
    Mismatch { diff: String },
}

impl Outcome {
    /// The diff for a non-passing outcome.
    pub fn diff(&self) -> Option<&str> {
        match self {
            Outcome::Passed => None,
            Outcome::Updated { diff } | Outcome::Mismatch { diff } => Some(diff),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

type ChangeMap = HashMap<PathBuf, Arc<Mutex<FileChangeSet>>>;

/// Process-scoped reconciliation state and entry points.
pub struct Session {
    flags: RunFlags,
    golden_dir: PathBuf,
    locks: PathLocks,
    store: GoldenStore,
    changes: Mutex<ChangeMap>,
    package_names: Mutex<HashMap<PathBuf, Option<String>>>,
    differ: Box<dyn DiffText + Send + Sync>,
    formatter: Box<dyn Reformat + Send + Sync>,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    /// Session with flags captured from the process environment.
    pub fn new() -> Self {
        Session::with_flags(RunFlags::from_process())
    }

    /// Session with explicit flags.
    pub fn with_flags(flags: RunFlags) -> Self {
        Session {
            flags,
            golden_dir: PathBuf::from("testdata"),
            locks: PathLocks::new(),
            store: GoldenStore::new(),
            changes: Mutex::new(HashMap::new()),
            package_names: Mutex::new(HashMap::new()),
            differ: Box::new(LineDiff),
            formatter: Box::new(Rustfmt::new()),
        }
    }

    /// Override the default golden artifact directory (`testdata`).
    pub fn golden_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.golden_dir = dir.into();
        self
    }

    /// Override the diff collaborator.
    pub fn differ(mut self, differ: impl DiffText + Send + Sync + 'static) -> Self {
        self.differ = Box::new(differ);
        self
    }

    /// Override the source reformatter.
    pub fn formatter(mut self, formatter: impl Reformat + Send + Sync + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// The flags this session runs under.
    pub fn flags(&self) -> &RunFlags {
        &self.flags
    }

    /// Drop all accumulated state: eviction memory, change ledgers, and
    /// caches. Exposed for test isolation only.
    pub fn reset(&self) {
        self.store.reset();
        if let Ok(mut changes) = self.changes.lock() {
            changes.clear();
        }
        if let Ok(mut names) = self.package_names.lock() {
            names.clear();
        }
    }

    // ------------------------------------------------------------------
    // Golden artifact checks
    // ------------------------------------------------------------------

    /// Compare `got` against the golden artifact for `name`.
    pub fn check_golden(&self, name: &str, got: &dyn Render) -> RegiltResult<Outcome> {
        self.check_golden_with(name, got, &CheckOptions::default())
    }

    /// Compare `got` against a golden artifact with placement overrides.
    pub fn check_golden_with(
        &self,
        name: &str,
        got: &dyn Render,
        opts: &CheckOptions,
    ) -> RegiltResult<Outcome> {
        let name = opts.name.as_deref().unwrap_or(name);
        let dir = absolute_path(opts.dir.as_deref().unwrap_or(&self.golden_dir))?;

        // Full update runs prune artifacts nothing referenced: the first
        // touch of a directory moves everything out, and each case
        // restores its own artifact. Both happen under the directory
        // lock, released again before rendering and diffing.
        let want = if self.flags.may_evict() {
            let guard = self.locks.acquire(&dir)?;
            self.store.evict(&dir)?;
            let want = self.store.load(&dir, name)?;
            guard.release()?;
            want
        } else {
            self.store.load(&dir, name)?
        };
        let want = want
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        let rendered = got.render(&RenderContext::new())?;
        let empty_raw = got.is_raw() && rendered.is_empty();
        let got_text = if empty_raw {
            String::new()
        } else {
            terminated(rendered)
        };

        let diff = self.differ.diff(&want, &got_text);
        if diff.is_empty() {
            return Ok(Outcome::Passed);
        }
        if self.flags.update_enabled() {
            let guard = self.locks.acquire(&dir)?;
            if empty_raw {
                self.store.remove(&dir, name)?;
            } else {
                self.store.store(&dir, name, got_text.as_bytes())?;
            }
            guard.release()?;
            tracing::debug!(name, dir = %dir.display(), "updated golden artifact");
            return Ok(Outcome::Updated { diff });
        }
        Ok(Outcome::Mismatch { diff })
    }

    /// Like [`check_golden`](Session::check_golden), panicking on failure
    /// the way a test assertion does.
    #[track_caller]
    pub fn assert_golden(&self, name: &str, got: &dyn Render) {
        self.finish(self.check_golden(name, got));
    }

    /// Like [`check_golden_with`](Session::check_golden_with), panicking
    /// on failure.
    #[track_caller]
    pub fn assert_golden_with(&self, name: &str, got: &dyn Render, opts: &CheckOptions) {
        self.finish(self.check_golden_with(name, got, opts));
    }

    // ------------------------------------------------------------------
    // In-source checks
    // ------------------------------------------------------------------

    /// Compare `got` against an in-source expectation in `function` of
    /// `file`, typically invoked as:
    ///
    /// ```ignore
    /// check.assert_inline(file!(), "parses_empty", expected!("Ast []"), &got);
    /// ```
    pub fn check_inline(
        &self,
        file: impl AsRef<Path>,
        function: &str,
        expected: Expected,
        got: &dyn Render,
    ) -> RegiltResult<Outcome> {
        let file = file.as_ref();
        let cx = RenderContext {
            package_name: self.package_name(file),
        };
        let got_text = got.render(&cx)?;

        let diff = self.differ.diff(&expected.value, &got_text);
        if diff.is_empty() {
            return Ok(Outcome::Passed);
        }
        if self.flags.update_enabled() {
            let abs = absolute_path(file)?;
            let guard = self.locks.acquire(&abs)?;
            self.patch_site(&abs, function, &expected.by, &got_text)?;
            guard.release()?;
            tracing::debug!(file = %abs.display(), function, "updated in-source expectation");
            return Ok(Outcome::Updated { diff });
        }
        Ok(Outcome::Mismatch { diff })
    }

    /// Like [`check_inline`](Session::check_inline), panicking on failure.
    #[track_caller]
    pub fn assert_inline(
        &self,
        file: impl AsRef<Path>,
        function: &str,
        expected: Expected,
        got: &dyn Render,
    ) {
        self.finish(self.check_inline(file, function, expected, got));
    }

    /// Rewrite one expectation site with the new value.
    ///
    /// Sites are located against the pristine original content; the change
    /// ledger maps them onto the live buffer, so several sites in the same
    /// file may be rewritten in any order across a run. The caller holds
    /// the file's path lock.
    fn patch_site(
        &self,
        file: &Path,
        function: &str,
        by: &Disambiguator,
        new_value: &str,
    ) -> RegiltResult<()> {
        let changes = self.changes_for(file)?;
        let mut changes = changes
            .lock()
            .map_err(|_| RegiltError::lock(file, "change ledger poisoned"))?;

        let site = locate(changes.original(), file, function, by)?;
        let edit = Edit::replace(site.span, string_literal(new_value));
        let staged = changes
            .stage(&edit)
            .map_err(|err| RegiltError::apply(file, err.to_string()))?;

        // A formatter rejection drops the staged splice: the ledger and
        // the file both keep their previous state.
        let formatted = self.formatter.reformat(file, staged.working())?;
        fs::write(file, &formatted).map_err(|err| RegiltError::io(file, err))?;
        changes.commit(staged);
        Ok(())
    }

    /// The change ledger for `file`, reading its pristine content on first
    /// touch.
    fn changes_for(&self, file: &Path) -> RegiltResult<Arc<Mutex<FileChangeSet>>> {
        let mut changes = self
            .changes
            .lock()
            .map_err(|_| RegiltError::lock(file, "change registry poisoned"))?;
        if let Some(entry) = changes.get(file) {
            return Ok(Arc::clone(entry));
        }
        let original = fs::read_to_string(file).map_err(|err| RegiltError::io(file, err))?;
        let entry = Arc::new(Mutex::new(FileChangeSet::new(original)));
        changes.insert(file.to_path_buf(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Display name of the package `file` belongs to, cached per
    /// directory.
    fn package_name(&self, file: &Path) -> Option<String> {
        let dir = file.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut cache = self.package_names.lock().ok()?;
        if let Some(cached) = cache.get(&dir) {
            return cached.clone();
        }
        let resolved = resolve_package_name(&dir);
        cache.insert(dir, resolved.clone());
        resolved
    }

    #[track_caller]
    fn finish(&self, outcome: RegiltResult<Outcome>) {
        match outcome {
            Ok(Outcome::Passed) => {}
            Ok(Outcome::Updated { diff }) => {
                if !self.flags.no_update_fail {
                    panic!("mismatch (-want +got):\n{diff}");
                }
            }
            Ok(Outcome::Mismatch { diff }) => panic!("mismatch (-want +got):\n{diff}"),
            Err(err) => panic!("{err}"),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Artifact content is the rendering plus a single trailing line
/// terminator.
fn terminated(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Spell a rendered value as a Rust string literal.
///
/// Multi-line and quote-bearing values become raw strings with enough `#`
/// marks to survive their content; everything else goes through the
/// escaping `Debug` form.
fn string_literal(text: &str) -> String {
    let needs_raw = text.contains('\n') || text.contains('"') || text.contains('\\');
    let raw_safe = !text
        .chars()
        .any(|c| c != '\n' && c != '\t' && c.is_control());
    if needs_raw && raw_safe {
        let mut hashes = String::new();
        while text.contains(&format!("\"{hashes}")) {
            hashes.push('#');
        }
        format!("r{hashes}\"{text}\"{hashes}")
    } else {
        format!("{text:?}")
    }
}

/// Resolve the package name for a directory from the nearest manifest.
fn resolve_package_name(dir: &Path) -> Option<String> {
    let mut current = dir;
    loop {
        let manifest = current.join("Cargo.toml");
        if manifest.is_file() {
            let text = fs::read_to_string(&manifest).ok()?;
            let value: toml::Value = toml::from_str(&text).ok()?;
            return value
                .get("package")?
                .get("name")?
                .as_str()
                .map(str::to_string);
        }
        current = current.parent()?;
    }
}

// ============================================================================
// Tests
// ============================================================================
