//! Value rendering: the serializer boundary.
//!
//! Rendering a value to its canonical textual form is a collaborator
//! concern; the engine only fixes the interface. [`Render`] turns a value
//! into text once per check, and the wrappers cover the common cases:
//! plain strings pass through, [`Json`] renders any `Serialize` value as
//! pretty-printed JSON, [`Dbg`] renders through `{:#?}`, and [`Raw`]
//! bypasses rendering entirely for content that is already in final form.
//!
//! An empty [`Raw`] value means "no expectation": under update mode the
//! driver deletes the stored artifact instead of writing one.

use std::fmt::Debug;

use serde::Serialize;

use crate::error::{RegiltError, RegiltResult};

/// Context handed to renderers.
///
/// `package_name` carries the display name of the package the checked test
/// lives in, so renderers that qualify type names can unqualify
/// package-local ones.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// Display name of the package under test, when resolvable.
    pub package_name: Option<String>,
}

impl RenderContext {
    /// Context with no package information.
    pub fn new() -> Self {
        RenderContext::default()
    }
}

/// A value that can be rendered to canonical text for comparison.
pub trait Render {
    /// Render the value to text.
    fn render(&self, cx: &RenderContext) -> RegiltResult<String>;

    /// Whether this value bypasses rendering (already in final form).
    fn is_raw(&self) -> bool {
        false
    }
}

impl Render for str {
    fn render(&self, _cx: &RenderContext) -> RegiltResult<String> {
        Ok(self.to_string())
    }
}

impl Render for &str {
    fn render(&self, _cx: &RenderContext) -> RegiltResult<String> {
        Ok(self.to_string())
    }
}

impl Render for String {
    fn render(&self, _cx: &RenderContext) -> RegiltResult<String> {
        Ok(self.clone())
    }
}

/// Pre-rendered content, used verbatim.
///
/// An empty `Raw` represents "no expectation".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw(pub String);

impl Raw {
    /// Wrap already-rendered content.
    pub fn new(content: impl Into<String>) -> Self {
        Raw(content.into())
    }
}

impl Render for Raw {
    fn render(&self, _cx: &RenderContext) -> RegiltResult<String> {
        Ok(self.0.clone())
    }

    fn is_raw(&self) -> bool {
        true
    }
}

/// Render any `Serialize` value as pretty-printed JSON.
#[derive(Debug, Clone, Copy)]
pub struct Json<'a, T: Serialize>(pub &'a T);

impl<T: Serialize> Render for Json<'_, T> {
    fn render(&self, _cx: &RenderContext) -> RegiltResult<String> {
        serde_json::to_string_pretty(self.0).map_err(|err| RegiltError::Render {
            message: err.to_string(),
        })
    }
}

/// Render any `Debug` value through `{:#?}`.
#[derive(Debug, Clone, Copy)]
pub struct Dbg<'a, T: Debug>(pub &'a T);

impl<T: Debug> Render for Dbg<'_, T> {
    fn render(&self, _cx: &RenderContext) -> RegiltResult<String> {
        Ok(format!("{:#?}", self.0))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_pass_through() {
        let cx = RenderContext::new();
        assert_eq!("plain".render(&cx).unwrap(), "plain");
        assert_eq!(String::from("owned").render(&cx).unwrap(), "owned");
        assert!(!"plain".is_raw());
    }

    #[test]
    fn raw_is_verbatim_and_flagged() {
        let cx = RenderContext::new();
        let raw = Raw::new("exact\nbytes");
        assert_eq!(raw.render(&cx).unwrap(), "exact\nbytes");
        assert!(raw.is_raw());
        assert!(Raw::new("").is_raw());
    }

    #[test]
    fn json_renders_pretty() {
        #[derive(Serialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        let cx = RenderContext::new();
        let rendered = Json(&Point { x: 1, y: 2 }).render(&cx).unwrap();
        assert_eq!(rendered, "{\n  \"x\": 1,\n  \"y\": 2\n}");
    }

    #[test]
    fn dbg_renders_alternate_debug() {
        let cx = RenderContext::new();
        let rendered = Dbg(&[1, 2]).render(&cx).unwrap();
        assert_eq!(rendered, "[\n    1,\n    2,\n]");
    }
}
