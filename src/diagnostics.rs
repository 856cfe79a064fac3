//! Unified diagnostics module.
//!
//! Single diagnostic type used across parsing and translation. Diagnostics
//! accumulate in a sink rather than propagating as `Result` errors, so one
//! bad state machine does not prevent the rest of the project from being
//! reported (§7).

use serde::{Deserialize, Serialize};

/// Diagnostic severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Hint,
    Info,
}

/// Diagnostic codes, following the error taxonomy in §7 plus a parse-level
/// code for malformed source that never reaches a valid AST.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// Source text does not parse at all.
    SyntaxError,
    /// A recognized AST shape that the Statement Visitor has no lowering
    /// for — an unsupported operator, a timestamp comparison, a dynamic
    /// branch list for `parallel`, or any statement shape not in §4.1.
    SyntaxUnsupported,
    /// A task class, iterator function, or branch function referenced but
    /// not defined at module scope.
    ReferenceError,
    /// An invalid or out-of-range task attribute.
    AttributeError,
    /// Two states in the same sub-machine share a key.
    KeyCollision,
    /// Structural misuse: `retry()` wrapping more than one statement, a
    /// `map` iterator that isn't a defined function, a `result_path` on a
    /// service that cannot return data, and similar shape violations.
    ShapeError,
    /// An unknown decorator or a conflicting decorator combination.
    DecoratorError,
}

/// Source location span, in line/column form for user-facing reporting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl SourceSpan {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Build a span from byte offsets, using the source text to compute
    /// line/column.
    pub fn from_byte_offset(source: &str, start: usize, end: usize) -> Self {
        let (start_line, start_col) = byte_to_line_col(source, start);
        let (end_line, end_col) = byte_to_line_col(source, end);
        Self::new(start_line, start_col, end_line, end_col)
    }

    pub fn from_span(source: &str, span: crate::ast::Span) -> Self {
        Self::from_byte_offset(source, span.start, span.end)
    }
}

fn byte_to_line_col(source: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;

    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Related information for multi-location diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelatedInfo {
    pub message: String,
    pub span: SourceSpan,
}

/// A diagnostic message with location, severity, and taxonomy code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub related: Vec<RelatedInfo>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            span: None,
            related: vec![],
        }
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            span: None,
            related: vec![],
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_related(mut self, related: RelatedInfo) -> Self {
        self.related.push(related);
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }

    pub fn is_warning(&self) -> bool {
        matches!(self.severity, Severity::Warning)
    }

    /// All six taxonomy kinds (plus `SyntaxError`) abort translation of the
    /// state machine they occur in (§7 policy); the only non-hard
    /// diagnostic this crate emits is the `result_path`-on-value-less-
    /// service warning, which is never one of these codes.
    pub fn is_hard_error(&self) -> bool {
        self.is_error()
    }
}

// =============================================================================
// Convenience builders
// =============================================================================

pub fn reference_error(what: &str, name: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::ReferenceError,
        format!("{what} '{name}' is not defined at module scope"),
    )
}

pub fn attribute_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(DiagnosticCode::AttributeError, message)
}

pub fn key_collision(key: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::KeyCollision,
        format!("state key '{key}' is used more than once in this sub-machine"),
    )
}

pub fn shape_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(DiagnosticCode::ShapeError, message)
}

pub fn decorator_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(DiagnosticCode::DecoratorError, message)
}

pub fn syntax_unsupported(message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(DiagnosticCode::SyntaxUnsupported, message)
}

// =============================================================================
// Tests
// =============================================================================
