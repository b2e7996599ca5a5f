//! Diagnostic - structured compiler errors
//!
//! Every failure the compiler reports is a `Diagnostic`: a severity, an
//! error code, a message, and labels pointing into the source. The
//! compiler stops at the first error (there is no multi-error recovery),
//! so diagnostics travel through the pipeline as the `Err` side of
//! `Result`.

use crate::span::Span;
use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Fatal error - aborts compilation
    Error,
    /// Warning - informational only
    Warning,
    /// Additional information attached to another diagnostic
    Note,
    /// A fix suggestion
    Help,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
            Level::Help => "help",
        }
    }

    /// ANSI color prefix used when rendering to a terminal
    pub fn color_code(&self) -> &'static str {
        match self {
            Level::Error => "\x1b[1;31m",
            Level::Warning => "\x1b[1;33m",
            Level::Note => "\x1b[1;36m",
            Level::Help => "\x1b[1;32m",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A label pointing at a region of source code
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    /// Primary labels are underlined with `^`, secondary with `-`
    pub primary: bool,
}

impl Label {
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: true,
        }
    }

    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: false,
        }
    }
}

/// Structured error code
///
/// Categories: `L` lexer, `P` parser, `M` modules, `T` types, `O`
/// ownership and linearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub category: char,
    pub number: u16,
}

impl ErrorCode {
    pub const fn new(category: char, number: u16) -> Self {
        Self { category, number }
    }

    // Lexer
    pub const UNEXPECTED_CHAR: Self = Self::new('L', 1);
    pub const UNTERMINATED_STRING: Self = Self::new('L', 2);
    pub const INVALID_NUMBER: Self = Self::new('L', 3);

    // Parser
    pub const UNEXPECTED_TOKEN: Self = Self::new('P', 1);
    pub const EXPECTED_EXPRESSION: Self = Self::new('P', 2);
    pub const EXPECTED_TYPE: Self = Self::new('P', 3);

    // Modules
    pub const MODULE_NOT_FOUND: Self = Self::new('M', 1);
    pub const NO_MAIN_FUNCTION: Self = Self::new('M', 2);
    pub const DUPLICATE_NAME: Self = Self::new('M', 3);

    // Types
    pub const TYPE_MISMATCH: Self = Self::new('T', 1);
    pub const UNKNOWN_TYPE: Self = Self::new('T', 2);
    pub const TYPE_ARITY_MISMATCH: Self = Self::new('T', 3);
    pub const UNKNOWN_VARIABLE: Self = Self::new('T', 4);
    pub const VARIABLE_ALREADY_EXISTS: Self = Self::new('T', 5);
    pub const VARIABLE_DOES_NOT_EXIST: Self = Self::new('T', 6);
    pub const UNKNOWN_FUNCTION: Self = Self::new('T', 7);
    pub const ARITY_MISMATCH: Self = Self::new('T', 8);
    pub const MULTI_VALUE_IN_CONTEXT: Self = Self::new('T', 9);
    pub const BRANCH_TYPE_DIVERGENCE: Self = Self::new('T', 10);
    pub const LOOP_TYPE_DIVERGENCE: Self = Self::new('T', 11);
    pub const TYPE_NARROW_ON_NON_UNION: Self = Self::new('T', 12);
    pub const TYPE_NARROW_IMPOSSIBLE: Self = Self::new('T', 13);
    pub const UNSUPPORTED_CALL: Self = Self::new('T', 14);
    pub const ENTRY_POINT_MAIN_KINDS: Self = Self::new('T', 15);

    // Ownership / linearity
    pub const UNCONSUMED_VALUE: Self = Self::new('O', 1);
    pub const CANNOT_BORROW_UNKNOWN: Self = Self::new('O', 2);
    pub const USE_AFTER_CONSUME: Self = Self::new('O', 3);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}{:03}", self.category, self.number)
    }
}

/// A complete diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub code: Option<ErrorCode>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub helps: Vec<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            helps: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            ..Self::error(message)
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::primary(span, message));
        self
    }

    pub fn with_secondary_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::secondary(span, message));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.helps.push(help.into());
        self
    }

    /// Whether any label points into the source yet
    ///
    /// Statement lowering uses this to attach the statement's own span to
    /// errors raised deep inside expression lowering.
    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}[{}]: {}", self.level, code, self.message),
            None => write!(f, "{}: {}", self.level, self.message),
        }
    }
}

/// Source text for every loaded module, keyed by file ID
#[derive(Debug, Default)]
pub struct SourceCache {
    files: Vec<SourceFile>,
}

#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub source: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            name: name.into(),
            source,
            line_starts,
        }
    }

    /// Text of a 1-indexed line, without its trailing newline
    pub fn get_line(&self, line: u32) -> Option<&str> {
        let idx = line.checked_sub(1)? as usize;
        let start = *self.line_starts.get(idx)?;
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&e| e.saturating_sub(1))
            .unwrap_or(self.source.len());
        Some(&self.source[start..end])
    }
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file and returns its ID
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> u32 {
        let id = self.files.len() as u32;
        self.files.push(SourceFile::new(name, source));
        id
    }

    pub fn get(&self, id: u32) -> Option<&SourceFile> {
        self.files.get(id as usize)
    }
}

/// Renders diagnostics against a `SourceCache`
pub struct DiagnosticRenderer<'a> {
    cache: &'a SourceCache,
    use_colors: bool,
}

impl<'a> DiagnosticRenderer<'a> {
    pub fn new(cache: &'a SourceCache) -> Self {
        Self {
            cache,
            use_colors: true,
        }
    }

    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.use_colors {
            code
        } else {
            ""
        }
    }

    /// Renders the diagnostic as a string
    pub fn render(&self, diagnostic: &Diagnostic) -> String {
        let reset = self.paint("\x1b[0m");
        let bold = self.paint("\x1b[1m");
        let blue = self.paint("\x1b[1;34m");
        let level_color = if self.use_colors {
            diagnostic.level.color_code()
        } else {
            ""
        };

        let mut out = String::new();

        // error[ET001]: message
        out.push_str(level_color);
        out.push_str(diagnostic.level.as_str());
        if let Some(code) = &diagnostic.code {
            out.push_str(&format!("[{}]", code));
        }
        out.push_str(reset);
        out.push_str(&format!("{}: {}{}\n", bold, diagnostic.message, reset));

        for label in &diagnostic.labels {
            let Some(file) = self.cache.get(label.span.file_id) else {
                continue;
            };

            let line = label.span.start.line;
            let col = label.span.start.column as usize;
            out.push_str(&format!(
                " {}-->{} {}:{}:{}\n",
                blue, reset, file.name, line, col
            ));

            let Some(text) = file.get_line(line) else {
                continue;
            };
            let gutter = " ".repeat(line.to_string().len());

            out.push_str(&format!(" {} {}|{}\n", gutter, blue, reset));
            out.push_str(&format!(" {}{}{} | {}\n", blue, line, reset, text));

            let width = if label.span.start.line == label.span.end.line {
                (label.span.end.column.saturating_sub(label.span.start.column)).max(1) as usize
            } else {
                text.len().saturating_sub(col.saturating_sub(1)).max(1)
            };
            let marker = if label.primary { "^" } else { "-" }.repeat(width);
            let marker_color = if label.primary { level_color } else { blue };

            out.push_str(&format!(
                " {} {}|{} {}{}{}{} {}\n",
                gutter,
                blue,
                reset,
                " ".repeat(col.saturating_sub(1)),
                marker_color,
                marker,
                reset,
                label.message
            ));
        }

        for note in &diagnostic.notes {
            out.push_str(&format!("  = {}note{}: {}\n", bold, reset, note));
        }
        for help in &diagnostic.helps {
            let green = self.paint("\x1b[1;32m");
            out.push_str(&format!("  = {}help{}: {}\n", green, reset, help));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    #[test]
    fn render_includes_code_location_and_label() {
        let mut cache = SourceCache::new();
        let file_id = cache.add("greet.ht", "func main(c: Clock): Clock {\n  return c\n}");

        let span = Span::new(Position::new(2, 10, 38), Position::new(2, 11, 39), file_id);
        let diag = Diagnostic::error("unknown variable \"c\"")
            .with_code(ErrorCode::UNKNOWN_VARIABLE)
            .with_label(span, "not found in this scope");

        let rendered = DiagnosticRenderer::new(&cache).without_colors().render(&diag);
        assert!(rendered.contains("error[ET004]"));
        assert!(rendered.contains("unknown variable"));
        assert!(rendered.contains("greet.ht:2:10"));
    }

    #[test]
    fn error_code_formatting() {
        assert_eq!(ErrorCode::UNCONSUMED_VALUE.to_string(), "EO001");
        assert_eq!(ErrorCode::TYPE_MISMATCH.to_string(), "ET001");
    }
}
