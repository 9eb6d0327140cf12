//! Diagnostics and error reporting for simulation descriptions
//!
//! Parse errors and static-analysis findings carry an optional byte
//! [`Span`] into the source so they can be rendered next to the line that
//! caused them.

use crate::parser::ParseError;
use std::fmt;

/// Byte range in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Line and column (both 1-based) of the span start
    pub fn location(&self, source: &str) -> SourceLocation {
        let start = self.start.min(source.len());
        let before = &source[..start];
        let line = before.matches('\n').count() + 1;
        let column = before.rfind('\n').map(|p| start - p).unwrap_or(start + 1);
        SourceLocation { line, column }
    }
}

/// Human-readable position of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// One finding from static analysis
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
        };
        write!(f, "{}: {}", level, self.message)
    }
}

/// Collected diagnostics, in the order they were found
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, other: Vec<Diagnostic>) {
        self.items.extend(other);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| !d.is_error())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }
}

impl From<Diagnostics> for Vec<Diagnostic> {
    fn from(d: Diagnostics) -> Self {
        d.items
    }
}

/// Format a parse error with context from the source code
pub fn format_parse_error(error: &ParseError, source: &str, line_num: Option<usize>) -> String {
    let mut msg = format!("Parse error: {}", error);

    let line = line_num.or_else(|| error.span().map(|s| s.location(source).line - 1));
    if let Some(line) = line {
        if let Some(text) = source.lines().nth(line) {
            msg.push_str(&format!("\n  at line {}: {}", line + 1, text.trim_end()));
        }
    }

    msg
}

/// Format a diagnostic, prefixed with its source location when known
pub fn format_diagnostic(diagnostic: &Diagnostic, source: &str) -> String {
    match diagnostic.span {
        Some(span) => format!("{} at {}", diagnostic, span.location(source)),
        None => diagnostic.to_string(),
    }
}
