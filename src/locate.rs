//! Structural lookup of expectation sites in test sources.
//!
//! An expectation site is the replaceable value argument of an
//! `expected!(...)` invocation inside a named test function:
//!
//! ```ignore
//! #[test]
//! fn parses_empty_input() {
//!     let got = parse("");
//!     check.assert_inline(file!(), "parses_empty_input", expected!("Ast []"), &got);
//! }
//! ```
//!
//! Lookup parses the file into a syntax tree, finds the function declaration
//! by name, and then finds the matching invocation within its body. An
//! invocation is matched either by the source line it starts on, or by its
//! label: the `expected!("label", value)` form carries a string literal as
//! its first argument, and the decoded label must compare equal. Matching is
//! exact; there is no fuzzy matching.
//!
//! Lookup always runs against the pristine original content of the file,
//! never against a partially rewritten buffer. Positions found here are
//! therefore expressed in original coordinates, which the patch ledger maps
//! onto the live buffer.

use std::path::{Path, PathBuf};

use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{Expr, ExprLit, ItemFn, Lit, Macro, Token};

use crate::error::{RegiltError, RegiltResult};
use crate::patch::Span;
use crate::text::position_to_byte_offset;

/// Name of the designated expectation macro.
pub const EXPECT_CALL: &str = "expected";

// ============================================================================
// Site Identity
// ============================================================================

/// How a site is told apart from other expectation calls in the same
/// function: by the line its invocation starts on, or by its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disambiguator {
    /// 1-indexed source line of the invocation in the original file.
    Line(u32),
    /// Decoded value of the invocation's string-literal label argument.
    Label(String),
}

impl Disambiguator {
    /// Human-readable description of the call being looked for, used in
    /// lookup failure messages.
    pub fn describe(&self) -> String {
        match self {
            Disambiguator::Line(line) => format!("{EXPECT_CALL}!(…) call on line {line}"),
            Disambiguator::Label(label) => format!("{EXPECT_CALL}!({label:?}, …) call"),
        }
    }
}

/// A located expectation site: one replaceable argument of one invocation,
/// scoped to one named function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationSite {
    /// The source file the site lives in.
    pub file: PathBuf,
    /// The enclosing test function.
    pub function: String,
    /// Byte span of the replaceable value argument, in original coordinates.
    pub span: Span,
    /// 1-indexed line the invocation starts on.
    pub line: u32,
}

// ============================================================================
// Lookup
// ============================================================================

/// Find the expectation site for `function`/`by` in `source`.
///
/// `source` must be the pristine original content of `file`; `file` is used
/// for error reporting only. Reports `FunctionNotFound` when the function
/// declaration is absent, and `SiteNotFound` when the function exists but
/// holds no matching invocation. A label lookup that misses lists up to two
/// other labels found in the function, with a trailing ellipsis when more
/// exist.
pub fn locate(
    source: &str,
    file: &Path,
    function: &str,
    by: &Disambiguator,
) -> RegiltResult<ExpectationSite> {
    let ast = syn::parse_file(source).map_err(|err| RegiltError::parse(file, err.to_string()))?;

    let mut functions = FnFinder {
        name: function,
        found: None,
    };
    functions.visit_file(&ast);
    let Some(item_fn) = functions.found else {
        return Err(RegiltError::function_not_found(file, function));
    };

    let mut calls = CallFinder {
        by,
        source,
        file,
        found: None,
        candidates: Vec::new(),
        error: None,
    };
    calls.visit_block(&item_fn.block);

    if let Some(err) = calls.error {
        return Err(err);
    }
    match calls.found {
        Some((span, line)) => {
            tracing::debug!(file = %file.display(), function, line, %span, "located expectation site");
            Ok(ExpectationSite {
                file: file.to_path_buf(),
                function: function.to_string(),
                span,
                line,
            })
        }
        None => Err(RegiltError::site_not_found(
            file,
            by.describe(),
            candidate_hint(&calls.candidates),
        )),
    }
}

/// Format up to two candidate labels, appending an ellipsis when more exist.
fn candidate_hint(candidates: &[String]) -> Option<String> {
    match candidates {
        [] => None,
        [one] => Some(one.clone()),
        [a, b] => Some(format!("{a}, {b}")),
        [a, b, ..] => Some(format!("{a}, {b}, …")),
    }
}

// ============================================================================
// Visitors
// ============================================================================

/// Finds the first function declaration with the requested name, anywhere
/// in the file (including inline test modules).
struct FnFinder<'a, 'ast> {
    name: &'a str,
    found: Option<&'ast ItemFn>,
}

impl<'a, 'ast> Visit<'ast> for FnFinder<'a, 'ast> {
    fn visit_item_fn(&mut self, node: &'ast ItemFn) {
        if self.found.is_some() {
            return;
        }
        if node.sig.ident == self.name {
            self.found = Some(node);
            return;
        }
        visit::visit_item_fn(self, node);
    }
}

/// Finds the matching `expected!` invocation within one function body.
struct CallFinder<'a> {
    by: &'a Disambiguator,
    source: &'a str,
    file: &'a Path,
    /// Replaceable-argument span and invocation line, once matched.
    found: Option<(Span, u32)>,
    /// Decoded labels of non-matching invocations, for the miss hint.
    candidates: Vec<String>,
    error: Option<RegiltError>,
}

impl<'a, 'ast> Visit<'ast> for CallFinder<'a> {
    fn visit_macro(&mut self, mac: &'ast Macro) {
        if self.found.is_some() || self.error.is_some() {
            return;
        }
        if !invokes_expect(mac) {
            visit::visit_macro(self, mac);
            return;
        }

        let Ok(args) = mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) else {
            // Not the designated shape; leave it alone.
            return;
        };
        let line = mac.path.span().start().line as u32;

        match (self.by, args.len()) {
            (Disambiguator::Line(want), 1 | 2) => {
                if line == *want {
                    let value = args.last().map(|v| to_byte_span(self.source, v));
                    self.found = value.map(|span| (span, line));
                }
            }
            (Disambiguator::Label(want), 2) => match &args[0] {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(label),
                    ..
                }) => {
                    if label.value() == *want {
                        let span = to_byte_span(self.source, &args[1]);
                        self.found = Some((span, line));
                    } else {
                        self.candidates.push(format!("{:?}", label.value()));
                    }
                }
                other => {
                    self.error = Some(RegiltError::LabelNotLiteral {
                        file: self.file.display().to_string(),
                        line: other.span().start().line as u32,
                    });
                }
            },
            _ => {}
        }
    }
}

/// Whether a macro invocation is the designated expectation call, by the
/// last segment of its path (`expected!` or `regilt::expected!`).
fn invokes_expect(mac: &Macro) -> bool {
    mac.path
        .segments
        .last()
        .is_some_and(|segment| segment.ident == EXPECT_CALL)
}

/// Convert a syntax node's span to a byte span against `source`.
///
/// Proc-macro line/column coordinates are 1-indexed lines with 0-indexed
/// character columns; byte offsets are recovered through the source text.
fn to_byte_span(source: &str, node: impl Spanned) -> Span {
    let span = node.span();
    let start =
        position_to_byte_offset(source, span.start().line as u32, span.start().column as u32 + 1);
    let end =
        position_to_byte_offset(source, span.end().line as u32, span.end().column as u32 + 1);
    Span::new(start, end)
}

// ============================================================================
// Tests
// ============================================================================
