//! Run mode flags: update, update-only, no-update-fail, filter detection.
//!
//! The reconciliation engine does not own a command line; it runs inside the
//! host test harness and sniffs its behavior flags from the process argument
//! list, with environment variables as an equivalent spelling for harnesses
//! that reject unknown arguments:
//!
//! | Argument | Environment | Meaning |
//! |---|---|---|
//! | `--update` | `REGILT_UPDATE=1` | rewrite mismatches, prune unreferenced artifacts on full runs |
//! | `--update-only` | `REGILT_UPDATE_ONLY=1` | rewrite mismatches, never prune |
//! | `--no-update-fail` | `REGILT_NO_UPDATE_FAIL=1` | do not fail a case whose expectation was rewritten |
//!
//! A test-selection filter in the argument list (a positional name filter,
//! or `--exact`/`--skip`) marks the run as restricted to a subset of cases.
//! Pruning under `--update` is suppressed on such runs, otherwise artifacts
//! belonging to deselected tests would be wrongly deleted.

use std::env;

/// Behavior flags for one test process, captured once at session start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Rewrite mismatched expectations; prune unreferenced artifacts on
    /// full, unfiltered runs.
    pub update: bool,
    /// Rewrite mismatched expectations, never prune.
    pub update_only: bool,
    /// Do not fail a test case whose expectation was rewritten.
    pub no_update_fail: bool,
    /// The run is restricted to a subset of test cases.
    pub filtered: bool,
}

impl RunFlags {
    /// Capture flags from this process's argument list and environment.
    pub fn from_process() -> Self {
        Self::capture(env::args().skip(1), |key| env::var(key).ok())
    }

    /// Capture flags from an explicit argument list and environment lookup.
    pub fn capture<I, E>(args: I, env: E) -> Self
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut flags = RunFlags {
            update: env_truthy(&env, "REGILT_UPDATE"),
            update_only: env_truthy(&env, "REGILT_UPDATE_ONLY"),
            no_update_fail: env_truthy(&env, "REGILT_NO_UPDATE_FAIL"),
            filtered: false,
        };

        for arg in args {
            match arg.as_str() {
                "--update" => flags.update = true,
                "--update-only" => flags.update_only = true,
                "--no-update-fail" => flags.no_update_fail = true,
                "--exact" | "--skip" => flags.filtered = true,
                _ => {
                    // A positional argument is the harness's test name filter.
                    if !arg.starts_with('-') {
                        flags.filtered = true;
                    }
                }
            }
        }

        flags
    }

    /// Whether mismatched expectations should be rewritten at all.
    pub fn update_enabled(&self) -> bool {
        self.update || self.update_only
    }

    /// Whether this run must leave unreferenced artifacts in place.
    ///
    /// True for explicit update-only mode, and for update mode on a
    /// filtered run.
    pub fn preserve_unreferenced(&self) -> bool {
        self.update_only || (self.update && self.filtered)
    }

    /// Whether this run evicts unreferenced artifacts.
    pub fn may_evict(&self) -> bool {
        self.update && !self.preserve_unreferenced()
    }
}

fn env_truthy<E>(env: &E, key: &str) -> bool
where
    E: Fn(&str) -> Option<String>,
{
    matches!(env(key).as_deref(), Some("1") | Some("true"))
}

// ============================================================================
// Tests
// ============================================================================
