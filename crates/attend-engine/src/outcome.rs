use std::fmt;

use attend_gate::RejectCause;
use attend_types::AttendanceEvent;
use serde::{Deserialize, Serialize};

/// Closed set of reasons a transition can be refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    // Input validation
    MissingField,
    InvalidConfidence,
    InvalidTimestamp,
    // Identity
    UserNotFound,
    UserInactive,
    AccessDenied,
    // State conflict
    AlreadyCheckedIn,
    AlreadyCheckedOut,
    NotCheckedInYet,
    // Verification
    LowConfidence,
    QrNotFound,
    QrNotYetValid,
    QrExpired,
    QrAlreadyUsed,
    QrWrongUser,
    // Infrastructure
    StorageUnavailable,
    TransactionConflict,
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidConfidence => "INVALID_CONFIDENCE",
            Self::InvalidTimestamp => "INVALID_TIMESTAMP",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::UserInactive => "USER_INACTIVE",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::AlreadyCheckedIn => "ALREADY_CHECKED_IN",
            Self::AlreadyCheckedOut => "ALREADY_CHECKED_OUT",
            Self::NotCheckedInYet => "NOT_CHECKED_IN_YET",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::QrNotFound => "QR_NOT_FOUND",
            Self::QrNotYetValid => "QR_NOT_YET_VALID",
            Self::QrExpired => "QR_EXPIRED",
            Self::QrAlreadyUsed => "QR_ALREADY_USED",
            Self::QrWrongUser => "QR_WRONG_USER",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::TransactionConflict => "TRANSACTION_CONFLICT",
        }
    }

    /// Human-readable default message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingField => "required field missing",
            Self::InvalidConfidence => "face confidence must be a number between 0 and 1",
            Self::InvalidTimestamp => "timestamp too far from server time",
            Self::UserNotFound => "user not found",
            Self::UserInactive => "user is inactive",
            Self::AccessDenied => "not allowed to act for this user",
            Self::AlreadyCheckedIn => "already checked in today",
            Self::AlreadyCheckedOut => "already checked out today",
            Self::NotCheckedInYet => "not checked in today",
            Self::LowConfidence => "face confidence too low, please try again",
            Self::QrNotFound => "qr code not found",
            Self::QrNotYetValid => "qr code not yet valid",
            Self::QrExpired => "qr code expired",
            Self::QrAlreadyUsed => "qr code already used",
            Self::QrWrongUser => "qr code was not issued to this user",
            Self::StorageUnavailable => "storage unavailable, try again later",
            Self::TransactionConflict => "concurrent update, try again",
        }
    }

    /// Retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable | Self::TransactionConflict)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<RejectCause> for RejectReason {
    fn from(cause: RejectCause) -> Self {
        match cause {
            RejectCause::LowConfidence => Self::LowConfidence,
            RejectCause::InvalidConfidence => Self::InvalidConfidence,
            RejectCause::QrNotFound => Self::QrNotFound,
            RejectCause::QrNotYetValid => Self::QrNotYetValid,
            RejectCause::QrExpired => Self::QrExpired,
            RejectCause::QrAlreadyUsed => Self::QrAlreadyUsed,
            RejectCause::QrWrongUser => Self::QrWrongUser,
        }
    }
}

/// A refused transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<RejectReason> for Rejection {
    fn from(reason: RejectReason) -> Self {
        Self::new(reason, reason.message())
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// Result of `request_check_in` / `request_check_out`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Admitted {
        event: AttendanceEvent,
        /// e.g. "check-in recorded for Ada Lovelace".
        message: String,
    },
    Rejected(Rejection),
}

impl TransitionOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    pub fn event(&self) -> Option<&AttendanceEvent> {
        match self {
            Self::Admitted { event, .. } => Some(event),
            Self::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Admitted { .. } => None,
            Self::Rejected(rejection) => Some(rejection.reason),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Admitted { message, .. } => message,
            Self::Rejected(rejection) => &rejection.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_causes_map_onto_reasons() {
        assert_eq!(RejectReason::from(RejectCause::QrExpired), RejectReason::QrExpired);
        assert_eq!(
            RejectReason::from(RejectCause::LowConfidence).code(),
            "LOW_CONFIDENCE"
        );
    }

    #[test]
    fn only_infrastructure_reasons_are_transient() {
        assert!(RejectReason::StorageUnavailable.is_transient());
        assert!(RejectReason::TransactionConflict.is_transient());
        assert!(!RejectReason::AlreadyCheckedIn.is_transient());
        assert!(!RejectReason::QrAlreadyUsed.is_transient());
    }

    #[test]
    fn reason_serializes_as_code() {
        let json = serde_json::to_string(&RejectReason::NotCheckedInYet).unwrap();
        assert_eq!(json, format!("\"{}\"", RejectReason::NotCheckedInYet.code()));
    }
}
