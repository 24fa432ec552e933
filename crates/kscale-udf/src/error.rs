//! Handler error types.

use kscale_autoscale::ScaleError;
use kscale_expr::EvalError;
use thiserror::Error;

/// Configuration rejected at `init`. Carries every violation found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while processing a point.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler is not initialized")]
    NotInitialized,

    #[error("the expression `when` should evaluate to true or false: {0}")]
    Predicate(#[source] EvalError),

    #[error(
        "the expression `by` should evaluate to an integer value: {0} (hint: there is a ROUND() function)"
    )]
    Formula(#[source] EvalError),

    #[error("failed to scale: {0}")]
    Scale(#[source] ScaleError),

    #[error("batching not supported")]
    BatchUnsupported,
}

impl From<ScaleError> for HandlerError {
    fn from(err: ScaleError) -> Self {
        match err {
            ScaleError::Evaluation(e) => HandlerError::Formula(e),
            other => HandlerError::Scale(other),
        }
    }
}
