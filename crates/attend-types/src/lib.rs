//! Foundation types for attendance tracking.
//!
//! This crate provides the identity, event, token, and temporal types shared
//! by every other attendance crate. It carries no storage or policy logic.
//!
//! # Key Types
//!
//! - [`UserId`] / [`CallerIdentity`] -- opaque user reference and the
//!   authenticator's claim about who is calling
//! - [`AttendanceEvent`] -- one admitted check-in or check-out
//! - [`QrToken`] -- single-use, time-boxed QR credential
//! - [`AuditEntry`] -- write-once record of one admission decision
//! - [`Clock`] -- injectable source of "now" plus calendar-date derivation
//! - [`DailyAttendanceSummary`] / [`MonthlyStatistics`] -- derived read views

pub mod audit;
pub mod error;
pub mod event;
pub mod identity;
pub mod summary;
pub mod temporal;
pub mod token;

pub use audit::{AuditAction, AuditEntry, AuditOutcome};
pub use error::TypeError;
pub use event::{AttendanceEvent, Direction, EventId, Method, Origin, Verification};
pub use identity::{CallerIdentity, UserId, UserRecord};
pub use summary::{format_duration, DailyAttendanceSummary, MonthlyStatistics};
pub use temporal::{CalendarPolicy, Clock, FixedClock, SystemClock};
pub use token::{QrToken, Redeemability, TokenCode};
