use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference to a user owned by an external identity system.
///
/// The attendance core treats user ids as immutable foreign keys; it never
/// creates, mutates, or interprets them beyond equality.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A user as seen by the user directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    /// Inactive (revoked) users always fail closed.
    pub active: bool,
}

impl UserRecord {
    pub fn active(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            active: true,
        }
    }
}

/// The authenticator's claim about the caller, produced before the core is
/// invoked and trusted as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: UserId,
    /// Elevated callers (administrators) may act on behalf of other users.
    pub elevated: bool,
}

impl CallerIdentity {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(id),
            elevated: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(id),
            elevated: true,
        }
    }

    /// Whether this caller may act on, or read the data of, `subject`.
    pub fn may_access(&self, subject: &UserId) -> bool {
        self.elevated || &self.user_id == subject
    }
}
