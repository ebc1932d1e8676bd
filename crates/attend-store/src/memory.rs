use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use attend_types::{
    AttendanceEvent, AuditEntry, Direction, EventId, QrToken, Redeemability, TokenCode, UserId,
    UserRecord,
};
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    AttendanceLedger, AuditTrail, ConsumeOutcome, SessionProvider, StoreSession, TokenStore,
    UserDirectory, MAX_HISTORY_ROWS,
};

type DayKey = (UserId, Direction, NaiveDate);

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserRecord>,
    events: Vec<AttendanceEvent>,
    day_keys: HashSet<DayKey>,
    tokens: HashMap<TokenCode, QrToken>,
    audit: Vec<AuditEntry>,
}

/// One reversible mutation.
enum Undo {
    User {
        id: UserId,
        previous: Option<UserRecord>,
    },
    Event(DayKey),
    Token {
        code: TokenCode,
        previous: Option<QrToken>,
    },
    Audit,
}

/// Process-local store for tests and embedding.
///
/// A read-write session holds the whole state exclusively, which makes every
/// such session serializable. Read-only sessions share the state with each
/// other. Mutations apply in place and are undone in reverse order on
/// rollback.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    fail_audit_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent audit write fail with `Unavailable`. Used to
    /// exercise audit-failure handling.
    pub fn set_audit_failure(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of committed attendance events.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Number of committed audit entries.
    pub async fn audit_count(&self) -> usize {
        self.state.read().await.audit.len()
    }
}

#[async_trait]
impl SessionProvider for InMemoryStore {
    type Session = MemorySession;

    async fn begin(&self, statement_timeout: Duration) -> StoreResult<MemorySession> {
        let guard = Arc::clone(&self.state).write_owned().await;
        Ok(self.session(Guard::Write(guard), statement_timeout))
    }

    async fn begin_read(&self, statement_timeout: Duration) -> StoreResult<MemorySession> {
        let guard = Arc::clone(&self.state).read_owned().await;
        Ok(self.session(Guard::Read(guard), statement_timeout))
    }
}

impl InMemoryStore {
    fn session(&self, guard: Guard, statement_timeout: Duration) -> MemorySession {
        MemorySession {
            guard: Some(guard),
            undo: Vec::new(),
            deadline: Instant::now() + statement_timeout,
            fail_audit_writes: self.fail_audit_writes.load(Ordering::SeqCst),
        }
    }
}

enum Guard {
    Write(OwnedRwLockWriteGuard<MemoryState>),
    Read(OwnedRwLockReadGuard<MemoryState>),
}

/// Session over an [`InMemoryStore`], exclusive unless opened read-only.
pub struct MemorySession {
    guard: Option<Guard>,
    undo: Vec<Undo>,
    deadline: Instant,
    fail_audit_writes: bool,
}

impl MemorySession {
    fn check_deadline(&self) -> StoreResult<()> {
        if Instant::now() > self.deadline {
            return Err(StoreError::Timeout("statement deadline exceeded".into()));
        }
        Ok(())
    }

    fn state(&self) -> StoreResult<&MemoryState> {
        self.check_deadline()?;
        match &self.guard {
            Some(Guard::Write(guard)) => Ok(&**guard),
            Some(Guard::Read(guard)) => Ok(&**guard),
            None => Err(StoreError::SessionFinished),
        }
    }

    fn state_mut(&mut self) -> StoreResult<&mut MemoryState> {
        self.check_deadline()?;
        match &mut self.guard {
            Some(Guard::Write(guard)) => Ok(&mut **guard),
            Some(Guard::Read(_)) => Err(StoreError::ReadOnly),
            None => Err(StoreError::SessionFinished),
        }
    }

    fn undo_all(&mut self) {
        let Some(Guard::Write(state)) = self.guard.as_mut() else {
            return;
        };
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::User { id, previous } => match previous {
                    Some(user) => {
                        state.users.insert(id, user);
                    }
                    None => {
                        state.users.remove(&id);
                    }
                },
                Undo::Event(key) => {
                    state.events.pop();
                    state.day_keys.remove(&key);
                }
                Undo::Token { code, previous } => match previous {
                    Some(token) => {
                        state.tokens.insert(code, token);
                    }
                    None => {
                        state.tokens.remove(&code);
                    }
                },
                Undo::Audit => {
                    state.audit.pop();
                }
            }
        }
    }
}

impl UserDirectory for MemorySession {
    fn find_user(&mut self, id: &UserId) -> StoreResult<Option<UserRecord>> {
        Ok(self.state()?.users.get(id).cloned())
    }

    fn upsert_user(&mut self, user: &UserRecord) -> StoreResult<()> {
        let previous = self.state_mut()?.users.insert(user.id.clone(), user.clone());
        self.undo.push(Undo::User {
            id: user.id.clone(),
            previous,
        });
        Ok(())
    }
}

impl AttendanceLedger for MemorySession {
    fn has_direction_on(
        &mut self,
        user_id: &UserId,
        direction: Direction,
        date: NaiveDate,
    ) -> StoreResult<bool> {
        let key = (user_id.clone(), direction, date);
        Ok(self.state()?.day_keys.contains(&key))
    }

    fn insert_event(&mut self, event: &AttendanceEvent) -> StoreResult<EventId> {
        let key = (event.user_id.clone(), event.direction, event.attendance_date);
        let state = self.state_mut()?;
        if state.day_keys.contains(&key) {
            return Err(StoreError::DuplicateDirection {
                user_id: event.user_id.clone(),
                direction: event.direction,
                date: event.attendance_date,
            });
        }
        if state.events.iter().any(|e| e.id == event.id) {
            return Err(StoreError::DuplicateKey(event.id.to_string()));
        }
        state.day_keys.insert(key.clone());
        state.events.push(event.clone());
        self.undo.push(Undo::Event(key));
        Ok(event.id)
    }

    fn events_for_user(
        &mut self,
        user_id: &UserId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: usize,
    ) -> StoreResult<Vec<AttendanceEvent>> {
        let state = self.state()?;
        let mut events: Vec<AttendanceEvent> = state
            .events
            .iter()
            .filter(|e| &e.user_id == user_id)
            .filter(|e| from.map_or(true, |d| e.attendance_date >= d))
            .filter(|e| to.map_or(true, |d| e.attendance_date <= d))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.event_time.cmp(&a.event_time));
        events.truncate(limit.min(MAX_HISTORY_ROWS));
        Ok(events)
    }
}

impl TokenStore for MemorySession {
    fn find_token(&mut self, code: &TokenCode) -> StoreResult<Option<QrToken>> {
        Ok(self.state()?.tokens.get(code).cloned())
    }

    fn issue_token(&mut self, token: &QrToken) -> StoreResult<()> {
        let state = self.state_mut()?;
        if state.tokens.contains_key(&token.code) {
            return Err(StoreError::DuplicateKey(token.code.prefix(10).to_string()));
        }
        if token.valid_until <= token.valid_from {
            return Err(StoreError::Constraint(format!(
                "token {} has an empty validity window",
                token.code.prefix(10)
            )));
        }
        state.tokens.insert(token.code.clone(), token.clone());
        self.undo.push(Undo::Token {
            code: token.code.clone(),
            previous: None,
        });
        Ok(())
    }

    fn try_consume(&mut self, code: &TokenCode, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        let state = self.state_mut()?;
        let Some(token) = state.tokens.get_mut(code) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        match token.redeemability(now) {
            Redeemability::AlreadyUsed => return Ok(ConsumeOutcome::AlreadyUsed),
            Redeemability::NotYetValid => return Ok(ConsumeOutcome::NotYetValid),
            Redeemability::Expired => return Ok(ConsumeOutcome::Expired),
            Redeemability::Redeemable => {}
        }
        let previous = token.clone();
        token.used = true;
        token.used_at = Some(now);
        token.usage_count += 1;
        let consumed = token.clone();
        self.undo.push(Undo::Token {
            code: code.clone(),
            previous: Some(previous),
        });
        Ok(ConsumeOutcome::Consumed(consumed))
    }
}

impl AuditTrail for MemorySession {
    fn record(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        if self.fail_audit_writes {
            return Err(StoreError::Unavailable("audit trail rejected write".into()));
        }
        self.state_mut()?.audit.push(entry.clone());
        self.undo.push(Undo::Audit);
        Ok(())
    }

    fn entries_for_user(&mut self, user_id: &UserId, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let state = self.state()?;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| e.user_id.as_ref() == Some(user_id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn recent_entries(&mut self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let state = self.state()?;
        Ok(state.audit.iter().rev().take(limit).cloned().collect())
    }
}

impl StoreSession for MemorySession {
    fn commit(mut self) -> StoreResult<()> {
        if Instant::now() > self.deadline {
            self.undo_all();
            self.guard = None;
            return Err(StoreError::Timeout("commit after statement deadline".into()));
        }
        self.undo.clear();
        self.guard = None;
        Ok(())
    }

    fn rollback(mut self) -> StoreResult<()> {
        self.undo_all();
        self.guard = None;
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.guard.is_some() && !self.undo.is_empty() {
            tracing::debug!(steps = self.undo.len(), "rolling back uncommitted session");
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_types::{Method, Origin, Verification};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 6, 8, 0, 0).unwrap()
    }

    fn event(user: &str, direction: Direction, at: DateTime<Utc>) -> AttendanceEvent {
        AttendanceEvent {
            id: EventId::new(),
            user_id: UserId::from(user),
            method: Method::Face,
            direction,
            event_time: at,
            attendance_date: at.date_naive(),
            verification: Verification::FaceConfidence(0.9),
            location: "HQ".into(),
            origin: Origin::default(),
            created_at: at,
        }
    }

    async fn session(store: &InMemoryStore) -> MemorySession {
        store.begin(Duration::from_secs(5)).await.unwrap()
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        s.upsert_user(&UserRecord::active("emp-1", "Ada")).unwrap();
        s.insert_event(&event("emp-1", Direction::CheckIn, t0())).unwrap();
        s.commit().unwrap();

        let mut s = session(&store).await;
        assert!(s.find_user(&UserId::from("emp-1")).unwrap().is_some());
        assert!(s
            .has_direction_on(&UserId::from("emp-1"), Direction::CheckIn, t0().date_naive())
            .unwrap());
    }

    #[tokio::test]
    async fn rollback_restores_previous_state() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        s.upsert_user(&UserRecord::active("emp-1", "Ada")).unwrap();
        s.issue_token(&QrToken::issue("QR-A", None, t0(), t0() + ChronoDuration::hours(8)))
            .unwrap();
        s.commit().unwrap();

        let mut s = session(&store).await;
        let mut renamed = UserRecord::active("emp-1", "Ada L.");
        renamed.active = false;
        s.upsert_user(&renamed).unwrap();
        s.insert_event(&event("emp-1", Direction::CheckIn, t0())).unwrap();
        assert!(s
            .try_consume(&TokenCode::new("QR-A"), t0() + ChronoDuration::hours(1))
            .unwrap()
            .is_consumed());
        s.record(&AuditEntry::failed(
            None,
            attend_types::AuditAction::CheckInQr,
            "x",
            &Origin::default(),
            t0(),
        ))
        .unwrap();
        s.rollback().unwrap();

        let mut s = session(&store).await;
        let user = s.find_user(&UserId::from("emp-1")).unwrap().unwrap();
        assert_eq!(user.display_name, "Ada");
        assert!(user.active);
        assert!(!s.find_token(&TokenCode::new("QR-A")).unwrap().unwrap().used);
        assert!(s.recent_entries(10).unwrap().is_empty());
        drop(s);
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_day_key_is_rejected() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        s.insert_event(&event("emp-1", Direction::CheckIn, t0())).unwrap();
        let err = s
            .insert_event(&event("emp-1", Direction::CheckIn, t0() + ChronoDuration::hours(2)))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateDirection { .. }));

        // Other direction and other day are distinct keys.
        s.insert_event(&event("emp-1", Direction::CheckOut, t0() + ChronoDuration::hours(8)))
            .unwrap();
        s.insert_event(&event("emp-1", Direction::CheckIn, t0() + ChronoDuration::days(1)))
            .unwrap();
    }

    #[tokio::test]
    async fn token_is_consumed_at_most_once() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        s.issue_token(&QrToken::issue("QR-B", None, t0(), t0() + ChronoDuration::hours(8)))
            .unwrap();
        let code = TokenCode::new("QR-B");
        let now = t0() + ChronoDuration::minutes(5);

        match s.try_consume(&code, now).unwrap() {
            ConsumeOutcome::Consumed(token) => {
                assert!(token.used);
                assert_eq!(token.used_at, Some(now));
                assert_eq!(token.usage_count, 1);
            }
            other => panic!("expected consumption, got {other:?}"),
        }
        assert_eq!(s.try_consume(&code, now).unwrap(), ConsumeOutcome::AlreadyUsed);
        assert_eq!(
            s.try_consume(&TokenCode::new("nope"), now).unwrap(),
            ConsumeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn consume_revalidates_the_window() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        s.issue_token(&QrToken::issue("QR-C", None, t0(), t0() + ChronoDuration::hours(8)))
            .unwrap();
        let code = TokenCode::new("QR-C");
        assert_eq!(
            s.try_consume(&code, t0() - ChronoDuration::minutes(1)).unwrap(),
            ConsumeOutcome::NotYetValid
        );
        assert_eq!(
            s.try_consume(&code, t0() + ChronoDuration::hours(8)).unwrap(),
            ConsumeOutcome::Expired
        );
    }

    #[tokio::test]
    async fn history_is_filtered_and_newest_first() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        for day in 0..5 {
            let at = t0() + ChronoDuration::days(day);
            s.insert_event(&event("emp-1", Direction::CheckIn, at)).unwrap();
        }
        s.insert_event(&event("emp-2", Direction::CheckIn, t0())).unwrap();

        let from = (t0() + ChronoDuration::days(1)).date_naive();
        let to = (t0() + ChronoDuration::days(3)).date_naive();
        let events = s
            .events_for_user(&UserId::from("emp-1"), Some(from), Some(to), 100)
            .unwrap();
        let days: Vec<NaiveDate> = events.iter().map(|e| e.attendance_date).collect();
        assert_eq!(
            days,
            vec![
                (t0() + ChronoDuration::days(3)).date_naive(),
                (t0() + ChronoDuration::days(2)).date_naive(),
                from,
            ]
        );

        let limited = s.events_for_user(&UserId::from("emp-1"), None, None, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn expired_deadline_fails_statements() {
        let store = InMemoryStore::new();
        let mut s = store.begin(Duration::ZERO).await.unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let err = s.find_user(&UserId::from("emp-1")).unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn read_sessions_share_and_refuse_writes() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        s.upsert_user(&UserRecord::active("emp-1", "Ada")).unwrap();
        s.commit().unwrap();

        let mut first = store.begin_read(Duration::from_secs(5)).await.unwrap();
        let mut second = store.begin_read(Duration::from_secs(5)).await.unwrap();
        assert!(first.find_user(&UserId::from("emp-1")).unwrap().is_some());
        assert!(second.find_user(&UserId::from("emp-1")).unwrap().is_some());

        let err = first
            .insert_event(&event("emp-1", Direction::CheckIn, t0()))
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
        first.rollback().unwrap();
        second.rollback().unwrap();

        // Writers proceed once readers are gone.
        let mut w = session(&store).await;
        w.insert_event(&event("emp-1", Direction::CheckIn, t0())).unwrap();
        w.commit().unwrap();
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn empty_token_window_is_a_constraint_violation() {
        let store = InMemoryStore::new();
        let mut s = session(&store).await;
        let err = s
            .issue_token(&QrToken::issue("QR-EMPTY", None, t0(), t0()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn audit_failure_injection() {
        let store = InMemoryStore::new();
        store.set_audit_failure(true);
        let mut s = session(&store).await;
        let entry = AuditEntry::failed(
            None,
            attend_types::AuditAction::CheckInFace,
            "x",
            &Origin::default(),
            t0(),
        );
        assert!(s.record(&entry).is_err());
        s.commit().unwrap();
        assert_eq!(store.audit_count().await, 0);
    }
}
