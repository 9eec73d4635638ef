//! Text position utilities for byte offset and line:column conversions.
//!
//! Structural lookup reports positions as line/column pairs while the patch
//! ledger works in byte offsets; this module converts between the two.
//!
//! ## Coordinate Conventions
//!
//! - Lines and columns are **1-indexed** (matching editor conventions)
//! - Byte offsets are **0-indexed**
//! - Columns count Unicode scalar values, not bytes
//! - Line/column values of 0 are clamped to 1

/// Convert a byte offset to a 1-indexed line and column.
///
/// Columns count Unicode scalar values. If `offset` exceeds the content
/// length, returns the position at end of content.
pub fn byte_offset_to_position(content: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    let mut current = 0usize;

    for ch in content.chars() {
        if current >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
        current += ch.len_utf8();
    }

    (line, col)
}

/// Convert a 1-indexed line and column to a byte offset.
///
/// Columns count Unicode scalar values. A column past the end of the line
/// clamps to the line end; a line past the end of the content clamps to the
/// content length.
pub fn position_to_byte_offset(content: &str, line: u32, col: u32) -> usize {
    let line = line.max(1);
    let col = col.max(1);

    let mut current_line = 1u32;

    for (i, ch) in content.char_indices() {
        if current_line == line {
            let mut current_col = 1u32;
            for (j, c) in content[i..].char_indices() {
                if current_col == col {
                    return i + j;
                }
                if c == '\n' {
                    break;
                }
                current_col += 1;
            }
            // Column beyond end of line: clamp to the line end.
            return content[i..].find('\n').map(|p| i + p).unwrap_or(content.len());
        }
        if ch == '\n' {
            current_line += 1;
        }
    }

    content.len()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_to_position_simple() {
        let content = "fn demo() {\n    work();\n}\n";
        assert_eq!(byte_offset_to_position(content, 0), (1, 1));
        assert_eq!(byte_offset_to_position(content, 3), (1, 4));
        assert_eq!(byte_offset_to_position(content, 12), (2, 1));
    }

    #[test]
    fn position_to_offset_simple() {
        let content = "fn demo() {\n    work();\n}\n";
        assert_eq!(position_to_byte_offset(content, 1, 1), 0);
        assert_eq!(position_to_byte_offset(content, 1, 4), 3);
        assert_eq!(position_to_byte_offset(content, 2, 1), 12);
    }

    #[test]
    fn roundtrip() {
        let content = "line1\nline2\nline3\n";
        for offset in 0..content.len() {
            let (line, col) = byte_offset_to_position(content, offset);
            let recovered = position_to_byte_offset(content, line, col);
            assert_eq!(
                recovered, offset,
                "roundtrip failed for offset {}: line={}, col={}",
                offset, line, col
            );
        }
    }

    #[test]
    fn multibyte_columns_count_chars() {
        let content = "let s = \"héllo\";\n";
        // 'é' is two bytes; the closing quote sits one byte further than
        // its column suggests.
        let (line, col) = byte_offset_to_position(content, content.find(';').unwrap());
        assert_eq!(line, 1);
        assert_eq!(col, 16);
        assert_eq!(
            position_to_byte_offset(content, 1, 16),
            content.find(';').unwrap()
        );
    }

    #[test]
    fn clamping() {
        let content = "short\nline\n";
        assert_eq!(position_to_byte_offset(content, 1, 100), 5);
        assert_eq!(position_to_byte_offset(content, 100, 1), content.len());
        assert_eq!(position_to_byte_offset(content, 0, 0), 0);
        let (line, col) = byte_offset_to_position(content, 1000);
        assert_eq!((line, col), (3, 1));
    }

    #[test]
    fn empty_content() {
        assert_eq!(byte_offset_to_position("", 0), (1, 1));
        assert_eq!(position_to_byte_offset("", 1, 1), 0);
    }
}
