//! Regilt: golden test reconciliation.
//!
//! Compares computed values against recorded expectations and, on request,
//! updates the expectations in place. Expectations live either in golden
//! artifact files (`testdata/<case>.golden`) or inline in test sources as
//! the value argument of an [`expected!`] invocation; either kind is
//! rewritten exactly, without disturbing anything else, even when many
//! rewrites land in the same file and when test cases run concurrently
//! in-process or across processes.

// Infrastructure
pub mod error;
pub mod flags;
pub mod lock;
pub mod text;

// Stores and patching
pub mod locate;
pub mod patch;
pub mod store;

// Collaborator boundaries
pub mod diff;
pub mod format;
pub mod render;

// Reconciliation driver
pub mod session;

pub use error::{RegiltError, RegiltResult};
pub use flags::RunFlags;
pub use locate::{Disambiguator, ExpectationSite};
pub use render::{Dbg, Json, Raw, Render, RenderContext};
pub use session::{CheckOptions, Expected, Outcome, Session};
