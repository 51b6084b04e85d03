//! Expression errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number '{text}' at offset {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("parse error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("type mismatch: {op} cannot be applied to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("expression evaluated to {0}, expected bool")]
    NotBoolean(&'static str),

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("expression is empty")]
    Empty,
}

impl ExprError {
    /// True for errors raised before evaluation
    #[must_use]
    pub fn is_compile_error(&self) -> bool {
        !matches!(self, ExprError::TypeMismatch { .. } | ExprError::NotBoolean(_))
    }
}

impl From<ExprError> for beacon_common::Error {
    fn from(e: ExprError) -> Self {
        beacon_common::Error::InvalidInput(format!("invalid expression: {}", e))
    }
}
