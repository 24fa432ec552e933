//! Scaling error types.

use kscale_expr::EvalError;
use kscale_store::StoreError;
use thiserror::Error;

/// Errors that abandon a scaling decision.
///
/// None of them leave the service state half-updated: cooldown and
/// instance count only ever move together.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("could not get scale count of service {service}: {source}")]
    RemoteRead {
        service: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to scale service {service}: {source}")]
    RemoteWrite {
        service: String,
        #[source]
        source: StoreError,
    },

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvalError),
}

pub type ScaleResult<T> = Result<T, ScaleError>;
