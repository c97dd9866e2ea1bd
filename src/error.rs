//! Error types for Vortex
//!
//! User-program failures are `Outcome::Exception` values and never show up
//! here. `VortexError` covers malformed source, I/O, and internal faults.

use crate::note::Note;
use crate::token::Span;
use thiserror::Error;

/// A Vortex error
#[derive(Debug, Error)]
pub enum VortexError {
    /// Lexer or parser failure.
    #[error("{}", render_syntax(.message, .span, .source_line.as_deref()))]
    Syntax {
        message: String,
        span: Span,
        source_line: Option<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An evaluator or validator invariant did not hold.
    #[error("internal error: {0}")]
    Internal(String),

    /// The program has error notes, so it was not evaluated.
    #[error("program rejected with {} error(s)", .0.len())]
    Rejected(Vec<Note>),

    /// The program threw an exception.
    #[error("uncaught exception: {}", .0.message)]
    Uncaught(Box<Note>),

    #[error("console app: {0}")]
    Console(String),
}

impl VortexError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        VortexError::Syntax {
            message: message.into(),
            span,
            source_line: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        VortexError::Internal(message.into())
    }

    /// Attach the offending source line to a syntax error.
    pub fn with_source(mut self, source: &str) -> Self {
        if let VortexError::Syntax {
            span, source_line, ..
        } = &mut self
        {
            if span.line > 0 {
                *source_line = source.lines().nth(span.line - 1).map(str::to_string);
            }
        }
        self
    }
}

fn render_syntax(message: &str, span: &Span, source_line: Option<&str>) -> String {
    let mut out = format!("[line {}:{}] Error: {}", span.line, span.column, message);
    if let Some(line) = source_line {
        out.push_str(&format!("\n  | {}", line));
        out.push_str(&format!("\n  | {}^", " ".repeat(span.column.saturating_sub(1))));
    }
    out
}

/// Result type for Vortex operations
pub type Result<T> = std::result::Result<T, VortexError>;
