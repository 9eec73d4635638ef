//! Patch ledger: position-safe multi-edit rewrites of one source file.
//!
//! A single process may rewrite several expectation sites in the same file,
//! in whatever order its test cases happen to run. Structural lookup always
//! resolves sites against the pristine original content, so every edit
//! arrives expressed in *original* byte coordinates. [`FileChangeSet`] owns
//! the translation onto the live, progressively edited buffer:
//!
//! - it keeps the pristine original and a working buffer that starts as a
//!   copy of it;
//! - every committed edit is recorded in a ledger ordered by original
//!   offset, together with the length of the text that replaced it;
//! - an incoming edit's live offset is its original offset plus the
//!   cumulative length delta of all ledger entries at earlier original
//!   offsets.
//!
//! Because the mapping consults only entries strictly before the incoming
//! span, edits may arrive in any order (including an edit to an earlier
//! line after a later line was already rewritten) and the final buffer is
//! identical to the one produced by applying them in line order.
//!
//! Re-editing a span that was already rewritten this run replaces the
//! previous replacement text in place; the ledger entry's recorded length
//! is updated rather than duplicated.

use thiserror::Error;

use crate::text::byte_offset_to_position;

// ============================================================================
// Core Types
// ============================================================================

/// Byte offsets into file content, half-open: `[start, end)`.
///
/// Spans are always expressed against the pristine original content of the
/// file they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    ///
    /// # Panics
    /// Panics if `start > end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "span start ({start}) must be <= end ({end})");
        Span { start, end }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if this span overlaps another. Adjacent spans do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One proposed replacement of an original-coordinate span with new text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// The span to replace, in original coordinates.
    pub span: Span,
    /// The replacement text.
    pub new_text: String,
}

impl Edit {
    /// Create a replacement edit.
    pub fn replace(span: Span, new_text: impl Into<String>) -> Self {
        Edit {
            span,
            new_text: new_text.into(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while mapping an edit onto the live buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The edit span extends beyond the original content.
    #[error("span {span} is out of bounds for source of length {source_len}")]
    SpanOutOfBounds { span: Span, source_len: usize },

    /// The edit span partially overlaps an already applied edit.
    #[error("span {span} overlaps previously applied edit {applied}")]
    OverlappingEdits { span: Span, applied: Span },
}

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

// ============================================================================
// Change Ledger
// ============================================================================

/// A committed edit: its original span and the length that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppliedEdit {
    original: Span,
    replacement_len: usize,
}

/// Where a staged edit lands in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// New entry, inserted at this index to keep the ledger ordered.
    Insert(usize),
    /// Re-edit of the entry at this index.
    Replace(usize),
}

/// An edit mapped onto the live buffer but not yet committed.
///
/// Staging and committing are separate so a caller can run the spliced
/// buffer through a formatter and discard the splice if formatting fails,
/// leaving the change set exactly as it was.
#[derive(Debug)]
pub struct StagedEdit {
    working: String,
    entry: AppliedEdit,
    slot: Slot,
}

impl StagedEdit {
    /// The working buffer with this edit spliced in.
    pub fn working(&self) -> &str {
        &self.working
    }
}

/// The ordered collection of edits applied to one file during a process's
/// lifetime.
///
/// Owned by the session; created on the first touch of a file and reset
/// only with the session. The pristine `original` content is what
/// structural lookup parses; the `working` buffer accumulates splices and
/// is never itself reparsed or reformatted in place.
#[derive(Debug, Clone)]
pub struct FileChangeSet {
    original: String,
    working: String,
    applied: Vec<AppliedEdit>,
}

impl FileChangeSet {
    /// Create a change set over pristine file content.
    pub fn new(original: String) -> Self {
        let working = original.clone();
        FileChangeSet {
            original,
            working,
            applied: Vec::new(),
        }
    }

    /// The pristine original content.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The live buffer with all committed edits spliced in.
    pub fn working(&self) -> &str {
        &self.working
    }

    /// Number of distinct spans rewritten so far.
    pub fn edit_count(&self) -> usize {
        self.applied.len()
    }

    /// Map `edit` onto the live buffer and splice it, without committing.
    ///
    /// Spans must lie on character boundaries of the original content,
    /// which holds for every span produced by structural lookup.
    pub fn stage(&self, edit: &Edit) -> PatchResult<StagedEdit> {
        if edit.span.end > self.original.len() {
            return Err(PatchError::SpanOutOfBounds {
                span: edit.span,
                source_len: self.original.len(),
            });
        }

        let mut delta = 0isize;
        let mut slot = Slot::Insert(self.applied.len());
        for (i, applied) in self.applied.iter().enumerate() {
            if applied.original == edit.span {
                slot = Slot::Replace(i);
                break;
            }
            if applied.original.end <= edit.span.start {
                delta += applied.replacement_len as isize - applied.original.len() as isize;
                continue;
            }
            if applied.original.overlaps(&edit.span) {
                return Err(PatchError::OverlappingEdits {
                    span: edit.span,
                    applied: applied.original,
                });
            }
            // Ledger is ordered; everything from here on starts after the
            // incoming span.
            slot = Slot::Insert(i);
            break;
        }

        let live_start = (edit.span.start as isize + delta) as usize;
        let live_len = match slot {
            Slot::Replace(i) => self.applied[i].replacement_len,
            Slot::Insert(_) => edit.span.len(),
        };

        let mut working = self.working.clone();
        working.replace_range(live_start..live_start + live_len, &edit.new_text);

        Ok(StagedEdit {
            working,
            entry: AppliedEdit {
                original: edit.span,
                replacement_len: edit.new_text.len(),
            },
            slot,
        })
    }

    /// Commit a staged edit, making its buffer the live buffer.
    pub fn commit(&mut self, staged: StagedEdit) {
        let (line, col) = byte_offset_to_position(&self.original, staged.entry.original.start);
        tracing::debug!(
            span = %staged.entry.original,
            line,
            col,
            replacement_len = staged.entry.replacement_len,
            "committing edit"
        );
        self.working = staged.working;
        match staged.slot {
            Slot::Replace(i) => self.applied[i] = staged.entry,
            Slot::Insert(i) => self.applied.insert(i, staged.entry),
        }
    }

    /// Stage and commit in one step.
    pub fn apply(&mut self, edit: &Edit) -> PatchResult<&str> {
        let staged = self.stage(edit)?;
        self.commit(staged);
        Ok(&self.working)
    }
}

// ============================================================================
// Tests
// ============================================================================
