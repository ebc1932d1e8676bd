//! Transactional storage for the attendance core.
//!
//! Four logical stores share one session so that an admission decision, the
//! token it consumes, the event it appends and the audit entry it writes
//! commit or roll back together:
//!
//! - [`UserDirectory`] -- resolves user ids to directory records
//! - [`AttendanceLedger`] -- append-only events, unique per (user, direction, day)
//! - [`TokenStore`] -- single-use QR tokens with an atomic conditional consume
//! - [`AuditTrail`] -- write-once decision log
//!
//! # Storage Backends
//!
//! Both backends implement [`SessionProvider`]:
//!
//! - [`InMemoryStore`] -- process-local, one session at a time, undo-log rollback
//! - [`SqliteStore`] -- one `BEGIN IMMEDIATE` connection per session
//!
//! Sessions are handed out by an explicitly constructed [`SessionPool`],
//! which bounds concurrency and acquisition time.
//!
//! # Design Rules
//!
//! 1. The (user, direction, day) uniqueness constraint lives in storage and
//!    is authoritative; callers' pre-checks are only a fast path.
//! 2. Token consumption is a single conditional update, re-validated at
//!    write time.
//! 3. A session that is dropped without `commit` rolls back.
//! 4. All backend errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod pool;
pub mod sqlite;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, MemorySession};
pub use pool::{PoolConfig, PooledSession, SessionPool};
pub use sqlite::{SqliteSession, SqliteStore};
pub use traits::{
    AttendanceLedger, AuditTrail, ConsumeOutcome, SessionProvider, StoreSession, TokenStore,
    UserDirectory, MAX_HISTORY_ROWS,
};
