use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown attendance method: {0}")]
    UnknownMethod(String),

    #[error("unknown attendance direction: {0}")]
    UnknownDirection(String),

    #[error("unknown audit action: {0}")]
    UnknownAction(String),

    #[error("unknown audit outcome: {0}")]
    UnknownOutcome(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid utc offset: {0} minutes")]
    InvalidOffset(i32),
}
