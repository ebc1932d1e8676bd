use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use attend_types::{
    AttendanceEvent, AuditAction, AuditEntry, AuditOutcome, Direction, EventId, Method, Origin,
    QrToken, Redeemability, TokenCode, UserId, UserRecord, Verification,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    AttendanceLedger, AuditTrail, ConsumeOutcome, SessionProvider, StoreSession, TokenStore,
    UserDirectory, MAX_HISTORY_ROWS,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id       TEXT PRIMARY KEY,
    display_name  TEXT NOT NULL,
    active        INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS attendance_events (
    event_id         TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    method           TEXT NOT NULL,
    direction        TEXT NOT NULL,
    event_time_ms    INTEGER NOT NULL,
    attendance_date  TEXT NOT NULL,
    face_confidence  REAL,
    qr_code          TEXT,
    location         TEXT NOT NULL,
    ip_address       TEXT,
    device           TEXT,
    created_at_ms    INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_events_user_direction_day
    ON attendance_events (user_id, direction, attendance_date);

CREATE INDEX IF NOT EXISTS idx_events_user_time
    ON attendance_events (user_id, event_time_ms);

CREATE TABLE IF NOT EXISTS qr_tokens (
    code            TEXT PRIMARY KEY,
    bound_user_id   TEXT,
    valid_from_ms   INTEGER NOT NULL,
    valid_until_ms  INTEGER NOT NULL,
    used            INTEGER NOT NULL DEFAULT 0,
    used_at_ms      INTEGER,
    usage_count     INTEGER NOT NULL DEFAULT 0,
    CHECK (valid_until_ms > valid_from_ms)
);

CREATE TABLE IF NOT EXISTS audit_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT,
    action        TEXT NOT NULL,
    description   TEXT NOT NULL,
    outcome       TEXT NOT NULL,
    ip_address    TEXT,
    user_agent    TEXT,
    timestamp_ms  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log (user_id, id);
"#;

/// SQLite-backed store.
///
/// Every session is its own connection. Read-write sessions run a
/// `BEGIN IMMEDIATE` transaction, so writers are serialized by the database;
/// read-only sessions run a deferred `BEGIN` and, under WAL, never block
/// writers. The busy timeout doubles as the statement timeout.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path).map_err(classify)?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(classify)?;
        conn.execute_batch(SCHEMA).map_err(classify)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "sqlite store opened");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path, busy_timeout: Duration) -> StoreResult<Connection> {
        let conn = Connection::open(path).map_err(classify)?;
        conn.busy_timeout(busy_timeout).map_err(classify)?;
        Ok(conn)
    }
}

#[async_trait]
impl SessionProvider for SqliteStore {
    type Session = SqliteSession;

    async fn begin(&self, statement_timeout: Duration) -> StoreResult<SqliteSession> {
        self.open_session(statement_timeout, false).await
    }

    async fn begin_read(&self, statement_timeout: Duration) -> StoreResult<SqliteSession> {
        self.open_session(statement_timeout, true).await
    }
}

impl SqliteStore {
    /// The statement deadline starts once `BEGIN` has returned, so time
    /// spent waiting for the write lock is not charged to the session.
    async fn open_session(
        &self,
        statement_timeout: Duration,
        read_only: bool,
    ) -> StoreResult<SqliteSession> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::connect(&path, statement_timeout)?;
            let begin = if read_only { "BEGIN" } else { "BEGIN IMMEDIATE" };
            conn.execute_batch(begin).map_err(classify)?;
            Ok::<_, StoreError>(SqliteSession {
                conn: Some(conn),
                deadline: Instant::now() + statement_timeout,
                read_only,
            })
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("session task failed: {err}")))?
    }
}

/// One transaction on a dedicated connection.
pub struct SqliteSession {
    conn: Option<Connection>,
    deadline: Instant,
    read_only: bool,
}

impl SqliteSession {
    fn conn(&self) -> StoreResult<&Connection> {
        if Instant::now() > self.deadline {
            return Err(StoreError::Timeout("statement deadline exceeded".into()));
        }
        self.conn.as_ref().ok_or(StoreError::SessionFinished)
    }

    fn writer(&self) -> StoreResult<&Connection> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.conn()
    }

    fn finish(&mut self, sql: &str) -> StoreResult<()> {
        let conn = self.conn.take().ok_or(StoreError::SessionFinished)?;
        conn.execute_batch(sql).map_err(classify)
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %err, "rollback of abandoned sqlite session failed");
            }
        }
    }
}

impl UserDirectory for SqliteSession {
    fn find_user(&mut self, id: &UserId) -> StoreResult<Option<UserRecord>> {
        self.conn()?
            .query_row(
                "SELECT user_id, display_name, active FROM users WHERE user_id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(UserRecord {
                        id: UserId::new(row.get::<_, String>(0)?),
                        display_name: row.get(1)?,
                        active: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(classify)
    }

    fn upsert_user(&mut self, user: &UserRecord) -> StoreResult<()> {
        self.writer()?
            .execute(
                "INSERT INTO users (user_id, display_name, active) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     active = excluded.active",
                params![user.id.as_str(), user.display_name, user.active],
            )
            .map_err(classify)?;
        Ok(())
    }
}

impl AttendanceLedger for SqliteSession {
    fn has_direction_on(
        &mut self,
        user_id: &UserId,
        direction: Direction,
        date: NaiveDate,
    ) -> StoreResult<bool> {
        self.conn()?
            .query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM attendance_events
                     WHERE user_id = ?1 AND direction = ?2 AND attendance_date = ?3
                 )",
                params![user_id.as_str(), direction.as_str(), date],
                |row| row.get(0),
            )
            .map_err(classify)
    }

    fn insert_event(&mut self, event: &AttendanceEvent) -> StoreResult<EventId> {
        let inserted = self.writer()?.execute(
            "INSERT INTO attendance_events (
                 event_id, user_id, method, direction, event_time_ms, attendance_date,
                 face_confidence, qr_code, location, ip_address, device, created_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.id.to_string(),
                event.user_id.as_str(),
                event.method.as_str(),
                event.direction.as_str(),
                event.event_time.timestamp_millis(),
                event.attendance_date,
                event.verification.face_confidence(),
                event.verification.qr_code().map(TokenCode::as_str),
                event.location,
                event.origin.ip_address,
                event.origin.device,
                event.created_at.timestamp_millis(),
            ],
        );
        match inserted {
            Ok(_) => Ok(event.id),
            Err(err) if constraint_code(&err) == Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                Err(StoreError::DuplicateDirection {
                    user_id: event.user_id.clone(),
                    direction: event.direction,
                    date: event.attendance_date,
                })
            }
            Err(err) if constraint_code(&err) == Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => {
                Err(StoreError::DuplicateKey(event.id.to_string()))
            }
            Err(err) => Err(classify(err)),
        }
    }

    fn events_for_user(
        &mut self,
        user_id: &UserId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: usize,
    ) -> StoreResult<Vec<AttendanceEvent>> {
        let limit = i64::try_from(limit.min(MAX_HISTORY_ROWS)).unwrap_or(0);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT event_id, user_id, method, direction, event_time_ms, attendance_date,
                        face_confidence, qr_code, location, ip_address, device, created_at_ms
                 FROM attendance_events
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR attendance_date >= ?2)
                   AND (?3 IS NULL OR attendance_date <= ?3)
                 ORDER BY event_time_ms DESC
                 LIMIT ?4",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![user_id.as_str(), from, to, limit], EventRow::from_row)
            .map_err(classify)?;
        let events = rows
            .map(|row| row.map_err(classify).and_then(EventRow::into_event))
            .collect();
        events
    }
}

impl TokenStore for SqliteSession {
    fn find_token(&mut self, code: &TokenCode) -> StoreResult<Option<QrToken>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT code, bound_user_id, valid_from_ms, valid_until_ms, used, used_at_ms,
                        usage_count
                 FROM qr_tokens WHERE code = ?1",
                params![code.as_str()],
                TokenRow::from_row,
            )
            .optional()
            .map_err(classify)?;
        row.map(TokenRow::into_token).transpose()
    }

    fn issue_token(&mut self, token: &QrToken) -> StoreResult<()> {
        let inserted = self.writer()?.execute(
            "INSERT INTO qr_tokens (
                 code, bound_user_id, valid_from_ms, valid_until_ms, used, used_at_ms, usage_count
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token.code.as_str(),
                token.bound_user_id.as_ref().map(UserId::as_str),
                token.valid_from.timestamp_millis(),
                token.valid_until.timestamp_millis(),
                token.used,
                token.used_at.map(|t| t.timestamp_millis()),
                token.usage_count,
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(err) if constraint_code(&err) == Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => {
                Err(StoreError::DuplicateKey(token.code.prefix(10).to_string()))
            }
            Err(err) => Err(classify(err)),
        }
    }

    fn try_consume(&mut self, code: &TokenCode, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        let now_ms = now.timestamp_millis();
        let changed = self
            .writer()?
            .execute(
                "UPDATE qr_tokens
                 SET used = 1, used_at_ms = ?2, usage_count = usage_count + 1
                 WHERE code = ?1 AND used = 0 AND valid_from_ms <= ?2 AND valid_until_ms > ?2",
                params![code.as_str(), now_ms],
            )
            .map_err(classify)?;

        let Some(token) = self.find_token(code)? else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if changed == 1 {
            return Ok(ConsumeOutcome::Consumed(token));
        }
        match token.redeemability(now) {
            Redeemability::AlreadyUsed => Ok(ConsumeOutcome::AlreadyUsed),
            Redeemability::NotYetValid => Ok(ConsumeOutcome::NotYetValid),
            Redeemability::Expired => Ok(ConsumeOutcome::Expired),
            Redeemability::Redeemable => Err(StoreError::Conflict(format!(
                "token {} redeemable but not updated",
                code.prefix(10)
            ))),
        }
    }
}

impl AuditTrail for SqliteSession {
    fn record(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        self.writer()?
            .execute(
                "INSERT INTO audit_log (
                     user_id, action, description, outcome, ip_address, user_agent, timestamp_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.user_id.as_ref().map(UserId::as_str),
                    entry.action.tag(),
                    entry.description,
                    entry.outcome.as_str(),
                    entry.ip_address,
                    entry.user_agent,
                    entry.timestamp.timestamp_millis(),
                ],
            )
            .map_err(classify)?;
        Ok(())
    }

    fn entries_for_user(&mut self, user_id: &UserId, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, action, description, outcome, ip_address, user_agent, timestamp_ms
                 FROM audit_log WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![user_id.as_str(), limit], AuditRow::from_row)
            .map_err(classify)?;
        let entries = rows
            .map(|row| row.map_err(classify).and_then(AuditRow::into_entry))
            .collect();
        entries
    }

    fn recent_entries(&mut self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, action, description, outcome, ip_address, user_agent, timestamp_ms
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![limit], AuditRow::from_row)
            .map_err(classify)?;
        let entries = rows
            .map(|row| row.map_err(classify).and_then(AuditRow::into_entry))
            .collect();
        entries
    }
}

impl StoreSession for SqliteSession {
    fn commit(mut self) -> StoreResult<()> {
        if Instant::now() > self.deadline {
            self.finish("ROLLBACK")?;
            return Err(StoreError::Timeout("commit after statement deadline".into()));
        }
        self.finish("COMMIT")
    }

    fn rollback(mut self) -> StoreResult<()> {
        self.finish("ROLLBACK")
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct EventRow {
    id: String,
    user_id: String,
    method: String,
    direction: String,
    event_time_ms: i64,
    attendance_date: NaiveDate,
    face_confidence: Option<f64>,
    qr_code: Option<String>,
    location: String,
    ip_address: Option<String>,
    device: Option<String>,
    created_at_ms: i64,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            method: row.get(2)?,
            direction: row.get(3)?,
            event_time_ms: row.get(4)?,
            attendance_date: row.get(5)?,
            face_confidence: row.get(6)?,
            qr_code: row.get(7)?,
            location: row.get(8)?,
            ip_address: row.get(9)?,
            device: row.get(10)?,
            created_at_ms: row.get(11)?,
        })
    }

    fn into_event(self) -> StoreResult<AttendanceEvent> {
        let method: Method = self.method.parse().map_err(corrupt)?;
        let verification = match (method, self.face_confidence, self.qr_code) {
            (Method::Face, Some(confidence), _) => Verification::FaceConfidence(confidence),
            (Method::Qr, _, Some(code)) => Verification::QrToken(TokenCode::new(code)),
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "event {} has no {method} evidence",
                    self.id
                )))
            }
        };
        Ok(AttendanceEvent {
            id: self.id.parse::<EventId>().map_err(corrupt)?,
            user_id: UserId::new(self.user_id),
            method,
            direction: self.direction.parse().map_err(corrupt)?,
            event_time: from_millis(self.event_time_ms)?,
            attendance_date: self.attendance_date,
            verification,
            location: self.location,
            origin: Origin {
                ip_address: self.ip_address,
                device: self.device,
            },
            created_at: from_millis(self.created_at_ms)?,
        })
    }
}

struct TokenRow {
    code: String,
    bound_user_id: Option<String>,
    valid_from_ms: i64,
    valid_until_ms: i64,
    used: bool,
    used_at_ms: Option<i64>,
    usage_count: u32,
}

impl TokenRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: row.get(0)?,
            bound_user_id: row.get(1)?,
            valid_from_ms: row.get(2)?,
            valid_until_ms: row.get(3)?,
            used: row.get(4)?,
            used_at_ms: row.get(5)?,
            usage_count: row.get(6)?,
        })
    }

    fn into_token(self) -> StoreResult<QrToken> {
        Ok(QrToken {
            code: TokenCode::new(self.code),
            bound_user_id: self.bound_user_id.map(UserId::new),
            valid_from: from_millis(self.valid_from_ms)?,
            valid_until: from_millis(self.valid_until_ms)?,
            used: self.used,
            used_at: self.used_at_ms.map(from_millis).transpose()?,
            usage_count: self.usage_count,
        })
    }
}

struct AuditRow {
    user_id: Option<String>,
    action: String,
    description: String,
    outcome: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    timestamp_ms: i64,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            action: row.get(1)?,
            description: row.get(2)?,
            outcome: row.get(3)?,
            ip_address: row.get(4)?,
            user_agent: row.get(5)?,
            timestamp_ms: row.get(6)?,
        })
    }

    fn into_entry(self) -> StoreResult<AuditEntry> {
        Ok(AuditEntry {
            user_id: self.user_id.map(UserId::new),
            action: self.action.parse::<AuditAction>().map_err(corrupt)?,
            description: self.description,
            outcome: self.outcome.parse::<AuditOutcome>().map_err(corrupt)?,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            timestamp: from_millis(self.timestamp_ms)?,
        })
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn corrupt(err: attend_types::TypeError) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

/// Extended result code of a constraint violation, if `err` is one.
fn constraint_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Some(failure.extended_code)
        }
        _ => None,
    }
}

/// Map driver errors onto the store's transient/permanent categories.
fn classify(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return StoreError::Busy(err.to_string())
            }
            ErrorCode::CannotOpen
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure => return StoreError::Unavailable(err.to_string()),
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                return StoreError::Corrupt(err.to_string())
            }
            ErrorCode::ConstraintViolation => return StoreError::Constraint(err.to_string()),
            _ => {}
        }
    }
    StoreError::Sqlite(err)
}
