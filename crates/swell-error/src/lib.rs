//! swell-error - diagnostics for the Swell compiler
//!
//! Structured, rustc-style error reporting. The compiler reports one
//! error and aborts, so every phase returns `swell_error::Result` and the
//! first `Err` propagates to the driver, which renders it against the
//! `SourceCache`.
//!
//! # Example
//!
//! ```rust
//! use swell_error::{Diagnostic, DiagnosticRenderer, ErrorCode, SourceCache};
//! use swell_error::span::{Position, Span};
//!
//! let mut cache = SourceCache::new();
//! let file_id = cache.add("demo.ht", "let x = readLine(s)");
//!
//! let span = Span::new(Position::new(1, 5, 4), Position::new(1, 6, 5), file_id);
//! let diag = Diagnostic::error("variable x already exists")
//!     .with_code(ErrorCode::VARIABLE_ALREADY_EXISTS)
//!     .with_label(span, "second binding of this name");
//!
//! let rendered = DiagnosticRenderer::new(&cache).without_colors().render(&diag);
//! assert!(rendered.contains("demo.ht:1:5"));
//! ```

pub mod diagnostic;
pub mod span;

pub use diagnostic::{
    Diagnostic, DiagnosticRenderer, ErrorCode, Label, Level, SourceCache, SourceFile,
};
pub use span::{Position, Span, Spanned};

/// Result type used by every fallible compiler phase
pub type Result<T> = std::result::Result<T, Diagnostic>;
