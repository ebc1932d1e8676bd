use std::time::Duration;

use async_trait::async_trait;
use attend_types::{
    AttendanceEvent, AuditEntry, Direction, EventId, QrToken, TokenCode, UserId, UserRecord,
};
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreResult;

/// Upper bound on rows returned by any history query.
pub const MAX_HISTORY_ROWS: usize = 1000;

/// Result of an atomic conditional token consumption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The token flipped from unused to used; carries the updated token.
    Consumed(QrToken),
    AlreadyUsed,
    NotYetValid,
    Expired,
    NotFound,
}

impl ConsumeOutcome {
    pub fn is_consumed(&self) -> bool {
        matches!(self, Self::Consumed(_))
    }
}

/// Resolves user ids to directory records.
pub trait UserDirectory {
    fn find_user(&mut self, id: &UserId) -> StoreResult<Option<UserRecord>>;

    /// Insert or replace a user. Provisioning only; the transition engine
    /// never calls this.
    fn upsert_user(&mut self, user: &UserRecord) -> StoreResult<()>;
}

/// Append-only attendance events keyed by (user, direction, day).
///
/// Implementations must enforce uniqueness of (user, direction,
/// attendance_date) at the storage level, independent of any pre-check the
/// caller performed.
pub trait AttendanceLedger {
    fn has_direction_on(
        &mut self,
        user_id: &UserId,
        direction: Direction,
        date: NaiveDate,
    ) -> StoreResult<bool>;

    /// Append an event. Fails with `StoreError::DuplicateDirection` when the
    /// day key is already taken.
    fn insert_event(&mut self, event: &AttendanceEvent) -> StoreResult<EventId>;

    /// Events for `user_id` with `from <= attendance_date <= to`, newest
    /// first, at most `limit` rows (capped at [`MAX_HISTORY_ROWS`]).
    fn events_for_user(
        &mut self,
        user_id: &UserId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: usize,
    ) -> StoreResult<Vec<AttendanceEvent>>;
}

/// Single-use QR credentials.
pub trait TokenStore {
    fn find_token(&mut self, code: &TokenCode) -> StoreResult<Option<QrToken>>;

    /// Register a freshly issued token. Fails with
    /// `StoreError::DuplicateKey` when the code exists.
    fn issue_token(&mut self, token: &QrToken) -> StoreResult<()>;

    /// Flip `used` to true iff the token exists, is unused and
    /// `valid_from <= now < valid_until`, all in one conditional update.
    fn try_consume(&mut self, code: &TokenCode, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome>;
}

/// Write-once record of admission decisions.
pub trait AuditTrail {
    fn record(&mut self, entry: &AuditEntry) -> StoreResult<()>;

    /// Entries for one user, newest first.
    fn entries_for_user(&mut self, user_id: &UserId, limit: usize) -> StoreResult<Vec<AuditEntry>>;

    /// Most recent entries across all users, newest first.
    fn recent_entries(&mut self, limit: usize) -> StoreResult<Vec<AuditEntry>>;
}

/// One serializable unit of work over every store.
///
/// Nothing is visible to other sessions until `commit`. Dropping a session
/// without committing rolls it back.
pub trait StoreSession: UserDirectory + AttendanceLedger + TokenStore + AuditTrail + Send {
    fn commit(self) -> StoreResult<()>;

    fn rollback(self) -> StoreResult<()>;
}

/// A backend able to open serializable sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    type Session: StoreSession + 'static;

    /// Open a read-write session whose statements must all finish within
    /// `statement_timeout` of it opening.
    async fn begin(&self, statement_timeout: Duration) -> StoreResult<Self::Session>;

    /// Open a session that only reads. It must not block writers for longer
    /// than its own reads take, and every write through it fails with
    /// `StoreError::ReadOnly`.
    async fn begin_read(&self, statement_timeout: Duration) -> StoreResult<Self::Session>;
}
