//! Audit trail entry types.
//!
//! Every admission attempt, admitted or not, produces exactly one
//! [`AuditEntry`]. Entries are write-once and carry only what an operator
//! needs to reconstruct the decision: who, which action, what happened.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::event::{Direction, Method, Origin};
use crate::identity::UserId;

/// The attempted transition an audit entry describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    CheckInFace,
    CheckOutFace,
    CheckInQr,
    CheckOutQr,
}

impl AuditAction {
    pub fn for_transition(direction: Direction, method: Method) -> Self {
        match (direction, method) {
            (Direction::CheckIn, Method::Face) => Self::CheckInFace,
            (Direction::CheckOut, Method::Face) => Self::CheckOutFace,
            (Direction::CheckIn, Method::Qr) => Self::CheckInQr,
            (Direction::CheckOut, Method::Qr) => Self::CheckOutQr,
        }
    }

    /// Stable tag persisted in the audit store.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::CheckInFace => "CHECKIN_FACE",
            Self::CheckOutFace => "CHECKOUT_FACE",
            Self::CheckInQr => "CHECKIN_QR",
            Self::CheckOutQr => "CHECKOUT_QR",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AuditAction {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECKIN_FACE" => Ok(Self::CheckInFace),
            "CHECKOUT_FACE" => Ok(Self::CheckOutFace),
            "CHECKIN_QR" => Ok(Self::CheckInQr),
            "CHECKOUT_QR" => Ok(Self::CheckOutQr),
            other => Err(TypeError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(TypeError::UnknownOutcome(other.to_string())),
        }
    }
}

/// A write-once record of one admission decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// `None` when the subject could not be resolved to a known user.
    pub user_id: Option<UserId>,
    pub action: AuditAction,
    pub description: String,
    pub outcome: AuditOutcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn success(
        user_id: UserId,
        action: AuditAction,
        description: impl Into<String>,
        origin: &Origin,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Some(user_id),
            action,
            description: description.into(),
            outcome: AuditOutcome::Success,
            ip_address: origin.ip_address.clone(),
            user_agent: origin.device.clone(),
            timestamp,
        }
    }

    pub fn failed(
        user_id: Option<UserId>,
        action: AuditAction,
        description: impl Into<String>,
        origin: &Origin,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            action,
            description: description.into(),
            outcome: AuditOutcome::Failed,
            ip_address: origin.ip_address.clone(),
            user_agent: origin.device.clone(),
            timestamp,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AuditOutcome::Success
    }
}
