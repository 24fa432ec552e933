//! Expression error types.

use thiserror::Error;

/// Result type alias for expression operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("expected {expected}, got {found}")]
    Type {
        expected: &'static str,
        found: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,
}

impl EvalError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}
