//! Byte ranges into source text and line/column recovery for diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A half-open byte range `[begin, end)` into a source file.
///
/// Source positions are byte offsets into the UTF-8 input. Line and column
/// information is only materialized on demand (see [`LineIndex`]) because the
/// hot compilation path never needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub begin: u32,
    pub end: u32,
}

impl Span {
    #[must_use]
    pub fn new(begin: u32, end: u32) -> Self {
        debug_assert!(begin <= end, "invalid span: begin > end");
        Self { begin, end }
    }

    /// An empty span positioned at `offset`.
    #[must_use]
    pub fn at(offset: u32) -> Self {
        Self::new(offset, offset)
    }

    /// The smallest span covering both `self` and `other`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self::new(self.begin.min(other.begin), self.end.max(other.end))
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.begin == self.end
    }

    #[must_use]
    pub fn len(self) -> usize {
        (self.end - self.begin) as usize
    }

    /// Slices the exact lexeme out of the source text.
    #[must_use]
    pub fn text(self, source: &str) -> &str {
        &source[self.begin as usize..self.end as usize]
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.begin, self.end)
    }
}

/// 1-based line and column position, for rendering `[line:column]` prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Lazy index over newline positions of a source file.
///
/// Built once per file when the first diagnostic is rendered; lookups are
/// binary searches over the newline offsets.
#[derive(Debug)]
pub struct LineIndex {
    /// Byte offset of the first character of each line.
    line_starts: Vec<u32>,
}

impl LineIndex {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (pos, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(u32::try_from(pos + 1).expect("source exceeds u32 range"));
            }
        }
        Self { line_starts }
    }

    /// Maps a byte offset to a 1-based line/column pair.
    ///
    /// Columns count Unicode scalar values, not bytes, so diagnostics point
    /// at the visible character position.
    #[must_use]
    pub fn line_col(&self, source: &str, offset: u32) -> LineCol {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line] as usize;
        let column = source[line_start..offset as usize].chars().count();
        LineCol {
            line: u32::try_from(line + 1).expect("line count exceeds u32"),
            column: u32::try_from(column + 1).expect("column exceeds u32"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_covers_both_spans() {
        let a = Span::new(4, 8);
        let b = Span::new(6, 12);
        assert_eq!(a.merge(b), Span::new(4, 12));
    }

    #[test]
    fn line_col_lookup() {
        let source = "ab\ncd\n\nxyz";
        let index = LineIndex::new(source);
        assert_eq!(index.line_col(source, 0), LineCol { line: 1, column: 1 });
        assert_eq!(index.line_col(source, 4), LineCol { line: 2, column: 2 });
        assert_eq!(index.line_col(source, 6), LineCol { line: 3, column: 1 });
        assert_eq!(index.line_col(source, 9), LineCol { line: 4, column: 3 });
    }

    #[test]
    fn line_col_counts_chars_not_bytes() {
        let source = "é é";
        let index = LineIndex::new(source);
        // The second 'é' starts at byte 3 but is the third character.
        assert_eq!(index.line_col(source, 3), LineCol { line: 1, column: 3 });
    }
}
