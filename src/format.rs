//! Source reformatting: the formatter boundary.
//!
//! After a text substitution is spliced into a file buffer, the whole
//! buffer passes through a reformatter before being written back. The
//! engine fixes only the interface: a formatter takes the spliced buffer
//! and returns the text to persist, or fails, in which case the patch is
//! rejected and the original file stays untouched.
//!
//! Setting `REGILT_DEBUG=1` dumps the pre-format buffer to stderr when
//! formatting fails, for troubleshooting broken replacements.

use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::error::{RegiltError, RegiltResult};

/// Environment toggle for the pre-format diagnostic dump.
pub const DEBUG_ENV: &str = "REGILT_DEBUG";

/// Reformats a patched source buffer before it is written back.
pub trait Reformat {
    /// Return the text to persist for `file`, given the spliced buffer.
    fn reformat(&self, file: &Path, source: &str) -> RegiltResult<String>;
}

// ============================================================================
// Implementations
// ============================================================================

/// Formatter that returns buffers unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Reformat for Passthrough {
    fn reformat(&self, _file: &Path, source: &str) -> RegiltResult<String> {
        Ok(source.to_string())
    }
}

/// Formatter that pipes the buffer through `rustfmt`.
#[derive(Debug, Clone)]
pub struct Rustfmt {
    edition: String,
}

impl Default for Rustfmt {
    fn default() -> Self {
        Rustfmt {
            edition: "2021".to_string(),
        }
    }
}

impl Rustfmt {
    /// Formatter for the default edition.
    pub fn new() -> Self {
        Rustfmt::default()
    }

    /// Formatter for a specific Rust edition.
    pub fn with_edition(edition: impl Into<String>) -> Self {
        Rustfmt {
            edition: edition.into(),
        }
    }

    fn run(&self, source: &str) -> io::Result<Output> {
        let mut child = Command::new("rustfmt")
            .arg("--edition")
            .arg(&self.edition)
            .arg("--emit")
            .arg("stdout")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes())?;
        }
        child.wait_with_output()
    }
}

impl Reformat for Rustfmt {
    fn reformat(&self, file: &Path, source: &str) -> RegiltResult<String> {
        let output = self.run(source).map_err(|err| {
            dump_on_debug(file, source);
            RegiltError::format_failure(file, err.to_string())
        })?;
        if !output.status.success() {
            dump_on_debug(file, source);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RegiltError::format_failure(
                file,
                format!("rustfmt exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        String::from_utf8(output.stdout)
            .map_err(|err| RegiltError::format_failure(file, err.to_string()))
    }
}

fn dump_on_debug(file: &Path, source: &str) {
    let enabled = matches!(
        std::env::var(DEBUG_ENV).as_deref(),
        Ok("1") | Ok("true")
    );
    if !enabled {
        return;
    }
    eprintln!("-------------");
    eprintln!("FAILED FORMATTING FILE: {}", file.display());
    eprintln!("PRE-FORMAT CONTENTS:");
    eprintln!("-------------");
    eprintln!("{source}");
    eprintln!("-------------");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input_unchanged() {
        let source = "fn main()   {   }\n";
        let formatted = Passthrough.reformat(Path::new("a.rs"), source).unwrap();
        assert_eq!(formatted, source);
    }

    #[test]
    fn rustfmt_normalizes_spacing() {
        if Command::new("rustfmt").arg("--version").output().is_err() {
            // Toolchain without rustfmt; nothing to exercise here.
            return;
        }
        let formatted = Rustfmt::new()
            .reformat(Path::new("a.rs"), "fn main()   {   }\n")
            .unwrap();
        assert_eq!(formatted, "fn main() {}\n");
    }

    #[test]
    fn rustfmt_rejects_broken_source() {
        if Command::new("rustfmt").arg("--version").output().is_err() {
            return;
        }
        let err = Rustfmt::new()
            .reformat(Path::new("a.rs"), "fn broken( {\n")
            .unwrap_err();
        assert!(matches!(err, RegiltError::FormatFailure { .. }));
    }
}
