//! The storage-level day key refuses a second check-in even when the
//! pre-check in front of it says the day is free.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attend_engine::{
    AttendanceRequest, CallerIdentity, EngineConfig, RejectReason, SessionPool, TransitionEngine,
};
use attend_store::{
    AttendanceLedger, AuditTrail, ConsumeOutcome, InMemoryStore, MemorySession, PoolConfig,
    SessionProvider, StoreResult, StoreSession, TokenStore, UserDirectory,
};
use attend_types::{
    AttendanceEvent, AuditEntry, Direction, EventId, FixedClock, QrToken, TokenCode, UserId,
    UserRecord,
};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 15, 8, 0, 0).unwrap()
}

/// In-memory store whose sessions never report an existing event, so only
/// the unique day key stands between a user and a second check-in.
#[derive(Clone, Default)]
struct StalePrecheck(InMemoryStore);

struct StaleSession(MemorySession);

#[async_trait]
impl SessionProvider for StalePrecheck {
    type Session = StaleSession;

    async fn begin(&self, statement_timeout: Duration) -> StoreResult<StaleSession> {
        self.0.begin(statement_timeout).await.map(StaleSession)
    }

    async fn begin_read(&self, statement_timeout: Duration) -> StoreResult<StaleSession> {
        self.0.begin_read(statement_timeout).await.map(StaleSession)
    }
}

impl UserDirectory for StaleSession {
    fn find_user(&mut self, id: &UserId) -> StoreResult<Option<UserRecord>> {
        self.0.find_user(id)
    }

    fn upsert_user(&mut self, user: &UserRecord) -> StoreResult<()> {
        self.0.upsert_user(user)
    }
}

impl AttendanceLedger for StaleSession {
    fn has_direction_on(&mut self, _: &UserId, _: Direction, _: NaiveDate) -> StoreResult<bool> {
        Ok(false)
    }

    fn insert_event(&mut self, event: &AttendanceEvent) -> StoreResult<EventId> {
        self.0.insert_event(event)
    }

    fn events_for_user(
        &mut self,
        user_id: &UserId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: usize,
    ) -> StoreResult<Vec<AttendanceEvent>> {
        self.0.events_for_user(user_id, from, to, limit)
    }
}

impl TokenStore for StaleSession {
    fn find_token(&mut self, code: &TokenCode) -> StoreResult<Option<QrToken>> {
        self.0.find_token(code)
    }

    fn issue_token(&mut self, token: &QrToken) -> StoreResult<()> {
        self.0.issue_token(token)
    }

    fn try_consume(&mut self, code: &TokenCode, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        self.0.try_consume(code, now)
    }
}

impl AuditTrail for StaleSession {
    fn record(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        self.0.record(entry)
    }

    fn entries_for_user(&mut self, user_id: &UserId, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        self.0.entries_for_user(user_id, limit)
    }

    fn recent_entries(&mut self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        self.0.recent_entries(limit)
    }
}

impl StoreSession for StaleSession {
    fn commit(self) -> StoreResult<()> {
        self.0.commit()
    }

    fn rollback(self) -> StoreResult<()> {
        self.0.rollback()
    }
}

#[tokio::test]
async fn day_key_refuses_second_check_in_and_keeps_token() {
    let store = InMemoryStore::new();
    let engine = TransitionEngine::new(
        SessionPool::new(StalePrecheck(store.clone()), PoolConfig::default()),
        EngineConfig::default(),
    )
    .unwrap()
    .with_clock(Arc::new(FixedClock::new(t0())));

    let mut session = engine.pool().acquire().await.unwrap();
    session.upsert_user(&UserRecord::active("emp-1", "Ada")).unwrap();
    for code in ["QR-DOOR-A", "QR-DOOR-B"] {
        session
            .issue_token(&QrToken::issue(
                code,
                Some(UserId::from("emp-1")),
                t0(),
                t0() + ChronoDuration::hours(8),
            ))
            .unwrap();
    }
    session.commit().unwrap();

    let first = engine
        .request_check_in(AttendanceRequest::qr(CallerIdentity::user("emp-1"), "QR-DOOR-A"))
        .await
        .unwrap();
    assert!(first.is_admitted());

    let second = engine
        .request_check_in(AttendanceRequest::qr(CallerIdentity::user("emp-1"), "QR-DOOR-B"))
        .await
        .unwrap();
    assert_eq!(second.reason(), Some(RejectReason::AlreadyCheckedIn));

    // The refused transition rolled back, so its token is still redeemable.
    let mut session = engine.pool().acquire_read().await.unwrap();
    let token = session
        .find_token(&TokenCode::new("QR-DOOR-B"))
        .unwrap()
        .unwrap();
    assert!(!token.used);
    assert_eq!(token.usage_count, 0);
    let entries = session.entries_for_user(&UserId::from("emp-1"), 10).unwrap();
    drop(session);

    assert_eq!(store.event_count().await, 1);
    assert_eq!(store.audit_count().await, 2);
    let failed: Vec<_> = entries.iter().filter(|e| !e.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].user_id, Some(UserId::from("emp-1")));
}
