use thiserror::Error;

/// Error kinds produced across the engine's db, core and cli layers.
///
/// Each variant corresponds to one of the error kinds in the engine design:
/// bad caller input, a failure surfaced by the backing store, an invariant
/// that must never be violated, or an ambiguity the planner resolves by
/// quietly degrading to exact execution.
#[derive(Debug, Error)]
pub enum AqeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backing store failure: {0}")]
    BackingStore(#[from] sqlx::Error),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("planning ambiguity: {0}")]
    PlanningAmbiguity(String),
}

pub type AqeResult<T> = Result<T, AqeError>;
