use attend_types::{Direction, UserId};
use chrono::NaiveDate;

/// Errors from storage sessions and backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The (user, direction, day) uniqueness constraint rejected an insert.
    #[error("{direction} already recorded for {user_id} on {date}")]
    DuplicateDirection {
        user_id: UserId,
        direction: Direction,
        date: NaiveDate,
    },

    /// A primary key other than the attendance day key already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// A session could not be acquired, or a statement ran past its deadline.
    #[error("storage timed out: {0}")]
    Timeout(String),

    /// The backend is locked by another writer and gave up waiting.
    #[error("storage busy: {0}")]
    Busy(String),

    /// The backend cannot be reached or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A serializable transaction could not be completed as issued.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A write violated a table constraint other than the keys above.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A write was attempted through a read-only session.
    #[error("session is read-only")]
    ReadOnly,

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The session was already committed or rolled back.
    #[error("session already finished")]
    SessionFinished,

    /// Error from the SQLite driver not covered by a more specific variant.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Busy(_) | Self::Unavailable(_) | Self::Conflict(_)
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_transient() {
        assert!(StoreError::Timeout("acquire".into()).is_transient());
        assert!(StoreError::Busy("locked".into()).is_transient());
        assert!(StoreError::Conflict("serialize".into()).is_transient());
        assert!(!StoreError::Corrupt("bad row".into()).is_transient());
        assert!(!StoreError::SessionFinished.is_transient());
        assert!(!StoreError::ReadOnly.is_transient());
        assert!(!StoreError::Constraint("check".into()).is_transient());
    }

    #[test]
    fn duplicate_direction_names_the_day() {
        let err = StoreError::DuplicateDirection {
            user_id: UserId::from("emp-7"),
            direction: Direction::CheckIn,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        };
        assert_eq!(err.to_string(), "check_in already recorded for emp-7 on 2026-03-02");
    }
}
