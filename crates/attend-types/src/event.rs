use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::identity::UserId;
use crate::token::TokenCode;

/// Unique identifier for an attendance event (UUID v7 for time-ordering).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(uuid::Uuid);

impl EventId {
    /// Generate a new time-ordered event ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for EventId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TypeError::InvalidId(s.to_string()))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.short_id())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an attendance request was verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Face,
    Qr,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Qr => "qr",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face" => Ok(Self::Face),
            "qr" => Ok(Self::Qr),
            other => Err(TypeError::UnknownMethod(other.to_string())),
        }
    }
}

/// Whether an event opens or closes the working day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    CheckIn,
    CheckOut,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check_in" => Ok(Self::CheckIn),
            "check_out" => Ok(Self::CheckOut),
            other => Err(TypeError::UnknownDirection(other.to_string())),
        }
    }
}

/// The evidence that admitted an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Verification {
    /// Face-match similarity score in `[0, 1]`.
    FaceConfidence(f64),
    /// The QR token that was consumed.
    QrToken(TokenCode),
}

impl Verification {
    pub fn method(&self) -> Method {
        match self {
            Self::FaceConfidence(_) => Method::Face,
            Self::QrToken(_) => Method::Qr,
        }
    }

    pub fn face_confidence(&self) -> Option<f64> {
        match self {
            Self::FaceConfidence(c) => Some(*c),
            Self::QrToken(_) => None,
        }
    }

    pub fn qr_code(&self) -> Option<&TokenCode> {
        match self {
            Self::FaceConfidence(_) => None,
            Self::QrToken(code) => Some(code),
        }
    }
}

/// Network and device descriptor of the caller that submitted a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub ip_address: Option<String>,
    pub device: Option<String>,
}

impl Origin {
    pub fn new(ip_address: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            device: Some(device.into()),
        }
    }
}

/// One admitted check-in or check-out.
///
/// Created exactly once by the transition engine and immutable thereafter.
/// `attendance_date` is the calendar day the admission was counted against
/// and is the uniqueness key together with `user_id` and `direction`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: EventId,
    pub user_id: UserId,
    pub method: Method,
    pub direction: Direction,
    pub event_time: DateTime<Utc>,
    pub attendance_date: NaiveDate,
    pub verification: Verification,
    pub location: String,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,
}
