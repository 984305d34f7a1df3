//! Adapter parse errors.

use thiserror::Error;

/// A parse or validation failure within an input block. Carries the 1-based
/// line number and the offending fragment; the whole block is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}: `{fragment}`")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
    pub fragment: String,
}

impl ParseError {
    pub fn new(
        line: usize,
        message: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            line,
            message: message.into(),
            fragment: fragment.into(),
        }
    }
}
