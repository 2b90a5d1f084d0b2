//! Diagnostic accumulation for the compiler pipeline.
//!
//! Lexing and parsing recover locally and keep going, so a single run can
//! report many problems. Every pass appends to one [`Diagnostics`] list;
//! compilation stops before IR construction if any entry has error severity.

use std::fmt;

use crate::span::{LineIndex, Span};

/// Severity of a reported diagnostic. Warnings do not stop compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum Severity {
    Warning,
    Error,
}

/// A single reported problem with its source range.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub message: String,
}

/// Ordered list of diagnostics produced by one compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    errors: usize,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, span: Span, message: impl Into<String>) {
        if severity == Severity::Error {
            self.errors += 1;
        }
        self.entries.push(Diagnostic {
            severity,
            span,
            message: message.into(),
        });
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Error, span, message);
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Warning, span, message);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Renders all entries with `[line:column]` prefixes against `source`.
    #[must_use]
    pub fn render(&self, source: &str) -> String {
        use fmt::Write;

        let index = LineIndex::new(source);
        let mut out = String::new();
        for entry in &self.entries {
            let pos = index.line_col(source, entry.span.begin);
            let _ = writeln!(out, "[{pos}] {}: {}", entry.severity, entry.message);
        }
        out
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_count_ignores_warnings() {
        let mut diag = Diagnostics::new();
        diag.warning(Span::at(0), "odd but legal");
        assert!(!diag.has_errors());
        diag.error(Span::at(0), "broken");
        assert!(diag.has_errors());
        assert_eq!(diag.error_count(), 1);
        assert_eq!(diag.len(), 2);
    }

    #[test]
    fn render_includes_line_and_column() {
        let source = "ab\ncd";
        let mut diag = Diagnostics::new();
        diag.error(Span::new(3, 4), "unexpected `c`");
        let rendered = diag.render(source);
        assert!(rendered.contains("[2:1]"));
        assert!(rendered.contains("unexpected `c`"));
    }
}
