//! Attendance state-transition engine.
//!
//! Decides whether a check-in or check-out request is admitted, records the
//! resulting event, and writes exactly one audit entry per request. The
//! engine owns no threads or tasks; any number of callers may drive it
//! concurrently through a shared [`TransitionEngine`].
//!
//! # Flow
//!
//! 1. Screen the request (required fields, value ranges, clock skew, caller
//!    authority).
//! 2. Open a pooled storage session.
//! 3. Resolve the user, pre-check today's ledger state, run the verification
//!    gateway.
//! 4. On admission: consume the QR token (if any), append the event, audit,
//!    commit. On refusal: audit and commit. On a write-time conflict: roll
//!    back and audit in a separate session.
//!
//! Reporting ([`AttendanceReports`]) is the read side: history, today's
//! summary, monthly statistics, QR validation and the audit trail.

pub mod config;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod report;
pub mod request;

pub use config::EngineConfig;
pub use engine::TransitionEngine;
pub use error::{EngineError, EngineResult, ReportError, ReportResult};
pub use outcome::{RejectReason, Rejection, TransitionOutcome};
pub use report::{monthly_rollup, summarize_day, AttendanceReports, QrValidation};
pub use request::{AttendanceRequest, Evidence};

// Re-export key types
pub use attend_gate::{GateConfig, QrBindingPolicy};
pub use attend_store::{PoolConfig, SessionPool};
pub use attend_types::{AttendanceEvent, CallerIdentity, Direction, Method, UserId};
