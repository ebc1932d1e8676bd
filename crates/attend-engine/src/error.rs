use attend_store::StoreError;
use attend_types::UserId;
use thiserror::Error;

/// Faults of the engine itself, as opposed to rejected requests.
///
/// A rejected check-in is a normal `TransitionOutcome::Rejected`; this type
/// is reserved for misconfiguration and unexpected storage faults.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from the reporting read path.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{caller} may not read attendance data of {subject}")]
    AccessDenied { caller: UserId, subject: UserId },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("qr code not found")]
    QrNotFound,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ReportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<StoreError> for ReportError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::StorageUnavailable(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

pub type ReportResult<T> = Result<T, ReportError>;
