use std::fmt;

/// Why a gateway refused the evidence it was given.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectCause {
    /// Face confidence below the configured threshold.
    LowConfidence,
    /// Face confidence outside `[0, 1]` or not a number.
    InvalidConfidence,
    QrNotFound,
    QrNotYetValid,
    QrExpired,
    QrAlreadyUsed,
    /// The token is bound to someone else, or unbound under a bound-only
    /// policy.
    QrWrongUser,
}

impl fmt::Display for RejectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LowConfidence => "face confidence below threshold",
            Self::InvalidConfidence => "face confidence outside [0, 1]",
            Self::QrNotFound => "qr code not found",
            Self::QrNotYetValid => "qr code not yet valid",
            Self::QrExpired => "qr code expired",
            Self::QrAlreadyUsed => "qr code already used",
            Self::QrWrongUser => "qr code not issued to this user",
        };
        f.write_str(text)
    }
}

/// The outcome of a single gateway evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Reject(RejectCause),
}

impl GateDecision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit)
    }

    pub fn cause(&self) -> Option<RejectCause> {
        match self {
            Self::Admit => None,
            Self::Reject(cause) => Some(*cause),
        }
    }
}
