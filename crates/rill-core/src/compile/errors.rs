//! Diagnostics reported by a toolchain and their mapping onto source text.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    /// Label used in rendered messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Note => "NOTE",
        }
    }
}

/// A diagnostic as reported by a toolchain.
///
/// `span` holds byte offsets into the text of the source unit named by
/// `source`. Diagnostics without a position use an empty span at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Name of the source unit the span refers to
    pub source: Option<String>,
    pub span: Range<usize>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            source: None,
            span: 0..0,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, message)
    }

    /// Attach a position in the named source unit.
    pub fn at(mut self, source: impl Into<String>, span: Range<usize>) -> Self {
        self.source = Some(source.into());
        self.span = span;
        self
    }
}

/// Ordered buffer of diagnostics for one compilation.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(
            "{}: {} at {:?}",
            diagnostic.severity.label(),
            diagnostic.message,
            diagnostic.span
        );
        self.diagnostics.push(diagnostic);
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// A diagnostic resolved against the full source it refers to.
///
/// `start` and `end` are byte offsets into `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationMessage {
    pub severity: Severity,
    pub message: String,
    pub start: usize,
    pub end: usize,
    pub source: Arc<str>,
}

impl CompilationMessage {
    /// Resolve a diagnostic, clamping its span to the source.
    pub fn from_diagnostic(diagnostic: Diagnostic, source: Arc<str>) -> Self {
        let start = floor_char_boundary(&source, diagnostic.span.start);
        let end = floor_char_boundary(&source, diagnostic.span.end.max(start));
        Self {
            severity: diagnostic.severity,
            message: diagnostic.message,
            start,
            end,
            source,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Byte range of the line containing `start`, without its terminator.
    fn line_range(&self) -> Range<usize> {
        let from = self.source[..self.start]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let mut to = self.source[self.start..]
            .find('\n')
            .map(|i| i + self.start)
            .unwrap_or(self.source.len());
        if to > from && self.source.as_bytes()[to - 1] == b'\r' {
            to -= 1;
        }
        from..to
    }

    /// The source line containing the start of the message.
    pub fn line_text(&self) -> &str {
        &self.source[self.line_range()]
    }

    /// 1-based line number of `start`.
    pub fn line(&self) -> usize {
        self.source[..self.start].matches('\n').count() + 1
    }

    /// 0-based character column of `start`.
    pub fn column(&self) -> usize {
        self.source[self.line_range().start..self.start].chars().count()
    }

    /// Marker line under [`line_text`](Self::line_text).
    pub fn caret_line(&self) -> String {
        let line = self.line_range();
        let mut out: String = self.source[line.start..self.start]
            .chars()
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();
        let marked_end = self.end.min(line.end).max(self.start);
        out.extend(self.source[self.start..marked_end].chars().map(|_| '^'));
        out
    }

    /// The framed, human-readable form.
    pub fn render(&self) -> String {
        format!(
            "==========\n{}\n{}\n{}:{}\n==========\n",
            self.line_text(),
            self.caret_line(),
            self.severity.label(),
            self.message
        )
    }
}

impl fmt::Display for CompilationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Converts `(line, column)` positions into byte offsets.
///
/// Lines are 1-based and columns count characters from 0, matching
/// `proc_macro2::LineColumn`.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            line_starts,
            len: source.len(),
        }
    }

    /// Byte offset of `(line, column)` in `source`, clamped to its end.
    pub fn offset(&self, source: &str, line: usize, column: usize) -> usize {
        let Some(&line_start) = self.line_starts.get(line.saturating_sub(1)) else {
            return self.len;
        };
        source[line_start..]
            .char_indices()
            .take_while(|(_, c)| *c != '\n')
            .map(|(i, _)| line_start + i)
            .chain(std::iter::once(
                source[line_start..]
                    .find('\n')
                    .map(|i| line_start + i)
                    .unwrap_or(self.len),
            ))
            .nth(column)
            .unwrap_or(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(source: &str, start: usize, end: usize) -> CompilationMessage {
        CompilationMessage::from_diagnostic(
            Diagnostic::error("cannot find type `Strin` in this scope").at("Foo.rs", start..end),
            source.into(),
        )
    }

    #[test]
    fn test_render_plain() {
        let source = "struct Foo;\nfn main(argv: Strin) {\n}\n";
        let start = source.find("Strin").unwrap();
        let msg = message(source, start, start + 5);
        assert_eq!(
            msg.to_string(),
            "==========\n\
             fn main(argv: Strin) {\n              ^^^^^\n\
             ERROR:cannot find type `Strin` in this scope\n\
             ==========\n"
        );
        assert_eq!(msg.line(), 2);
        assert_eq!(msg.column(), 14);
    }

    #[test]
    fn test_caret_keeps_tabs() {
        let source = "  \tfn \t\tscale(x: \tStrin) {}";
        let start = source.find("Strin").unwrap();
        let msg = message(source, start, start + 5);
        assert_eq!(msg.caret_line(), "  \t   \t\t         \t^^^^^");
    }

    #[test]
    fn test_span_clipped_to_line() {
        let source = "let a = b\n+ c;";
        let msg = message(source, 8, source.len());
        assert_eq!(msg.line_text(), "let a = b");
        assert_eq!(msg.caret_line(), "        ^");
    }

    #[test]
    fn test_warning_label() {
        let msg = CompilationMessage::from_diagnostic(
            Diagnostic::warning("unused variable").at("Foo.rs", 0..1),
            Arc::from("x"),
        );
        assert!(msg.render().contains("\nWARNING:unused variable\n"));
        assert!(!msg.is_error());
    }

    #[test]
    fn test_line_index() {
        let source = "ab\nc\u{e9}d\n";
        let index = LineIndex::new(source);
        assert_eq!(index.offset(source, 1, 0), 0);
        assert_eq!(index.offset(source, 2, 0), 3);
        assert_eq!(index.offset(source, 2, 2), 6);
        assert_eq!(index.offset(source, 2, 3), 7);
        assert_eq!(index.offset(source, 9, 0), source.len());
    }

    #[test]
    fn test_sink_counts_errors() {
        let mut sink = DiagnosticSink::new();
        sink.report(Diagnostic::warning("w"));
        assert!(!sink.has_errors());
        sink.report(Diagnostic::error("e"));
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.into_diagnostics().len(), 2);
    }
}
