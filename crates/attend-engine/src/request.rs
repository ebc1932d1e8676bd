use attend_types::{CallerIdentity, Method, Origin, TokenCode, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Method-specific evidence attached to a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Evidence {
    /// Face-match score computed upstream.
    Face { confidence: f64 },
    /// Presented QR code.
    Qr { code: TokenCode },
}

impl Evidence {
    pub fn method(&self) -> Method {
        match self {
            Self::Face { .. } => Method::Face,
            Self::Qr { .. } => Method::Qr,
        }
    }
}

/// One check-in or check-out attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRequest {
    /// Who is calling, as established by the authenticator.
    pub caller: CallerIdentity,
    /// Whose attendance is being recorded.
    pub user_id: UserId,
    pub evidence: Evidence,
    /// Client-supplied event time; server time when absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub origin: Origin,
}

impl AttendanceRequest {
    /// A request by `caller` for themselves.
    pub fn new(caller: CallerIdentity, evidence: Evidence) -> Self {
        Self {
            user_id: caller.user_id.clone(),
            caller,
            evidence,
            timestamp: None,
            location: None,
            origin: Origin::default(),
        }
    }

    pub fn face(caller: CallerIdentity, confidence: f64) -> Self {
        Self::new(caller, Evidence::Face { confidence })
    }

    pub fn qr(caller: CallerIdentity, code: impl Into<String>) -> Self {
        Self::new(
            caller,
            Evidence::Qr {
                code: TokenCode::new(code),
            },
        )
    }

    /// Act on behalf of `user_id`. Requires an elevated caller.
    pub fn on_behalf_of(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = UserId::new(user_id);
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}
