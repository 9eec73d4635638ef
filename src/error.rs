//! Error types for regilt.
//!
//! This module provides the unified error type (`RegiltError`) shared by the
//! artifact store, the source patcher, the lock coordinator, and the
//! reconciliation driver.
//!
//! ## Taxonomy
//!
//! - A missing golden artifact is NOT an error: loads report it as `None`
//!   and comparison treats it as an empty baseline.
//! - Structural lookup failures (`FunctionNotFound`, `SiteNotFound`,
//!   `LabelNotLiteral`, `Parse`) are fatal to the current test case and
//!   carry enough context to correct the test.
//! - `FormatFailure` means a patched buffer was rejected by the reformatter;
//!   the original source file is left untouched.
//! - `LockFailure` and `Io` are environmental failures, also scoped to the
//!   current test case.
//!
//! No failure aborts the overall run; the host test harness aggregates
//! per-case failures into its own exit status.

use std::io;
use std::path::Path;

use thiserror::Error;

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for all reconciliation operations.
#[derive(Debug, Error)]
pub enum RegiltError {
    /// The enclosing test function could not be found in the source file.
    #[error("{file}: could not find test function: {function}")]
    FunctionNotFound { file: String, function: String },

    /// The function exists but holds no matching expectation call.
    ///
    /// `site` describes the call being looked for. For label lookups,
    /// `hint` lists up to two other labels found in the function (with a
    /// trailing ellipsis when more exist) to help correct a typo.
    #[error("{file}: could not find {site}{}", fmt_hint(.hint))]
    SiteNotFound {
        file: String,
        site: String,
        hint: Option<String>,
    },

    /// A candidate expectation call's label argument is not a string literal.
    #[error("{file}:{line}: expected!(...) label must be a string literal")]
    LabelNotLiteral { file: String, line: u32 },

    /// The source file could not be parsed.
    #[error("{file}: parsing file: {message}")]
    Parse { file: String, message: String },

    /// An edit could not be mapped onto the file's change ledger.
    #[error("{file}: applying edit: {message}")]
    Apply { file: String, message: String },

    /// Reformatting a patched buffer failed; the file was not rewritten.
    #[error("{file}: formatting file: {message}")]
    FormatFailure { file: String, message: String },

    /// Rendering the checked value to text failed.
    #[error("rendering value: {message}")]
    Render { message: String },

    /// A path lock could not be acquired or released.
    #[error("lock {path}: {message}")]
    LockFailure { path: String, message: String },

    /// Filesystem error outside the recoverable not-found case.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

fn fmt_hint(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(" (did find {h})"),
        None => String::new(),
    }
}

/// Result type for reconciliation operations.
pub type RegiltResult<T> = Result<T, RegiltError>;

// ============================================================================
// Convenience Constructors
// ============================================================================

impl RegiltError {
    /// Create a function-not-found error.
    pub fn function_not_found(file: &Path, function: impl Into<String>) -> Self {
        RegiltError::FunctionNotFound {
            file: file.display().to_string(),
            function: function.into(),
        }
    }

    /// Create a site-not-found error with an optional candidate hint.
    pub fn site_not_found(file: &Path, site: impl Into<String>, hint: Option<String>) -> Self {
        RegiltError::SiteNotFound {
            file: file.display().to_string(),
            site: site.into(),
            hint,
        }
    }

    /// Create a parse error.
    pub fn parse(file: &Path, message: impl Into<String>) -> Self {
        RegiltError::Parse {
            file: file.display().to_string(),
            message: message.into(),
        }
    }

    /// Create an apply error.
    pub fn apply(file: &Path, message: impl Into<String>) -> Self {
        RegiltError::Apply {
            file: file.display().to_string(),
            message: message.into(),
        }
    }

    /// Create a formatting failure.
    pub fn format_failure(file: &Path, message: impl Into<String>) -> Self {
        RegiltError::FormatFailure {
            file: file.display().to_string(),
            message: message.into(),
        }
    }

    /// Create a lock failure.
    pub fn lock(path: &Path, message: impl Into<String>) -> Self {
        RegiltError::LockFailure {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Create an I/O error bound to the path it occurred on.
    pub fn io(path: &Path, source: io::Error) -> Self {
        RegiltError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
