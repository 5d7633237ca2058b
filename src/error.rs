//! Error types for the cinnabar lowering engine

use std::fmt;
use thiserror::Error;

/// Source location in the original program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
    /// Byte offset in source
    pub offset: usize,
}

impl SourceLocation {
    /// Create a new source location
    pub fn new(line: u32, column: u32, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Main error type for cinnabar
///
/// Misuse of the recording API (closing a block of the wrong kind, an
/// illegal exception-state transition) indicates a bug in the calling
/// visitor and is surfaced as a panic, not an `Error` value. The variants
/// here cover the fallible rendering surface.
#[derive(Error, Debug)]
pub enum Error {
    /// A label reference reached the renderer but the label was never marked
    #[error("CodegenError: label {label} was referenced but never marked")]
    UnresolvedLabel { label: u32 },

    /// A generated fragment references a substitution key absent from its map
    #[error("CodegenError: unknown substitution '{{{name}}}' in generated fragment")]
    UnknownSubstitution { name: String },

    /// Internal invariant violation
    #[error("InternalError: {0}")]
    InternalError(String),
}

impl Error {
    /// Create an unresolved-label error
    pub fn unresolved_label(label: u32) -> Self {
        Error::UnresolvedLabel { label }
    }

    /// Create an unknown-substitution error
    pub fn unknown_substitution(name: impl Into<String>) -> Self {
        Error::UnknownSubstitution { name: name.into() }
    }
}

/// Result type alias for cinnabar
pub type Result<T> = std::result::Result<T, Error>;
