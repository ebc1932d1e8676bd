use std::sync::Arc;

use attend_gate::{GateDecision, PresentedEvidence, VerificationGate};
use attend_store::{
    AuditTrail, ConsumeOutcome, SessionPool, SessionProvider, StoreError, StoreResult,
    StoreSession,
};
use attend_types::{
    AttendanceEvent, AuditAction, AuditEntry, CalendarPolicy, Clock, Direction, EventId,
    SystemClock, UserId, UserRecord, Verification,
};
use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::outcome::{RejectReason, Rejection, TransitionOutcome};
use crate::report::AttendanceReports;
use crate::request::{AttendanceRequest, Evidence};

/// Characters of a QR code that may appear in audit descriptions.
const AUDIT_CODE_PREFIX: usize = 10;

/// What the transition session decided.
enum Step {
    Admit {
        event: AttendanceEvent,
        user: UserRecord,
    },
    /// Refused before anything was written; audit and commit in-session.
    Refuse {
        rejection: Rejection,
        audit_user: Option<UserId>,
    },
    /// Refused after a write; roll back, then audit separately.
    Abort {
        rejection: Rejection,
        audit_user: Option<UserId>,
    },
}

/// Admits or refuses check-in and check-out requests.
///
/// Each call runs in one pooled storage session: user lookup, ledger
/// pre-check, verification, token consumption, event insert and the audit
/// entry commit together. Storage uniqueness and the conditional token
/// update are the authoritative guards against concurrent duplicates.
pub struct TransitionEngine<P: SessionProvider> {
    pool: SessionPool<P>,
    gate: VerificationGate,
    calendar: CalendarPolicy,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl<P: SessionProvider> TransitionEngine<P> {
    pub fn new(pool: SessionPool<P>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let gate = VerificationGate::new(&config.gate);
        let calendar = config.calendar()?;
        Ok(Self {
            pool,
            gate,
            calendar,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calendar(&self) -> CalendarPolicy {
        self.calendar
    }

    pub fn pool(&self) -> &SessionPool<P> {
        &self.pool
    }

    /// Read-side views sharing this engine's pool, calendar and clock.
    pub fn reports(&self) -> AttendanceReports<P> {
        AttendanceReports::new(self.pool.clone(), self.calendar, Arc::clone(&self.clock))
    }

    pub async fn request_check_in(&self, request: AttendanceRequest) -> EngineResult<TransitionOutcome> {
        self.transition(Direction::CheckIn, request).await
    }

    pub async fn request_check_out(
        &self,
        request: AttendanceRequest,
    ) -> EngineResult<TransitionOutcome> {
        self.transition(Direction::CheckOut, request).await
    }

    async fn transition(
        &self,
        direction: Direction,
        request: AttendanceRequest,
    ) -> EngineResult<TransitionOutcome> {
        let now = self.clock.now();
        let method = request.evidence.method();
        let action = AuditAction::for_transition(direction, method);
        tracing::debug!(user = %request.user_id, %direction, %method, "transition requested");

        if let Err(rejection) = self.screen(&request, now) {
            return Ok(self.refuse_detached(rejection, None, action, &request, now).await);
        }

        let mut session = match self.pool.acquire().await {
            Ok(session) => session,
            Err(err) if err.is_transient() => {
                // A second acquire for the audit entry would wait out the
                // same exhausted pool, so the refusal goes unaudited.
                let reason = match err {
                    StoreError::Conflict(_) => RejectReason::TransactionConflict,
                    _ => RejectReason::StorageUnavailable,
                };
                tracing::warn!(
                    error = %err,
                    user = %request.user_id,
                    %reason,
                    "no storage session; audit entry not written"
                );
                return Ok(TransitionOutcome::Rejected(reason.into()));
            }
            Err(err) => return self.storage_failure(err, action, &request, now).await,
        };

        let step = match self.decide(&mut *session, direction, &request, now) {
            Ok(step) => step,
            Err(err) => {
                drop(session);
                return self.storage_failure(err, action, &request, now).await;
            }
        };

        match step {
            Step::Admit { event, user } => {
                let entry = AuditEntry::success(
                    user.id.clone(),
                    action,
                    success_description(&event),
                    &request.origin,
                    now,
                );
                record_in_session(&mut *session, &entry);
                if let Err(err) = session.commit() {
                    return self.storage_failure(err, action, &request, now).await;
                }
                tracing::info!(
                    user = %event.user_id,
                    %direction,
                    %method,
                    event_id = %event.id,
                    date = %event.attendance_date,
                    "attendance recorded"
                );
                let message = format!("{} recorded for {}", label(direction), user.display_name);
                Ok(TransitionOutcome::Admitted { event, message })
            }
            Step::Refuse {
                rejection,
                audit_user,
            } => {
                tracing::debug!(
                    user = %request.user_id,
                    %direction,
                    reason = %rejection.reason,
                    "transition refused"
                );
                let entry = failure_entry(&rejection, audit_user, action, &request, now);
                record_in_session(&mut *session, &entry);
                if let Err(err) = session.commit() {
                    tracing::warn!(error = %err, "commit of refused transition failed");
                    self.audit_detached(&entry).await;
                }
                Ok(TransitionOutcome::Rejected(rejection))
            }
            Step::Abort {
                rejection,
                audit_user,
            } => {
                if let Err(err) = session.rollback() {
                    tracing::warn!(error = %err, "rollback of aborted transition failed");
                }
                Ok(self
                    .refuse_detached(rejection, audit_user, action, &request, now)
                    .await)
            }
        }
    }

    /// Checks that need no storage: required fields, value ranges, clock
    /// skew and caller authority.
    fn screen(&self, request: &AttendanceRequest, now: DateTime<Utc>) -> Result<(), Rejection> {
        if request.user_id.is_blank() {
            return Err(Rejection::new(RejectReason::MissingField, "user_id is required"));
        }
        match &request.evidence {
            Evidence::Face { confidence } => {
                if !confidence.is_finite() || !(0.0..=1.0).contains(confidence) {
                    return Err(RejectReason::InvalidConfidence.into());
                }
            }
            Evidence::Qr { code } => {
                if code.is_blank() {
                    return Err(Rejection::new(RejectReason::MissingField, "qr_code is required"));
                }
            }
        }
        if let Some(at) = request.timestamp {
            let skew = if at > now { at - now } else { now - at };
            let too_far = chrono::Duration::from_std(self.config.max_clock_skew)
                .map_or(false, |max| skew > max);
            if too_far {
                return Err(Rejection::new(
                    RejectReason::InvalidTimestamp,
                    format!(
                        "timestamp {} is more than {}s from server time",
                        at.to_rfc3339(),
                        self.config.max_clock_skew.as_secs()
                    ),
                ));
            }
        }
        if !request.caller.may_access(&request.user_id) {
            return Err(Rejection::new(
                RejectReason::AccessDenied,
                format!(
                    "{} may not record attendance for {}",
                    request.caller.user_id, request.user_id
                ),
            ));
        }
        Ok(())
    }

    /// Everything that happens inside the transition session.
    fn decide<S: StoreSession>(
        &self,
        session: &mut S,
        direction: Direction,
        request: &AttendanceRequest,
        now: DateTime<Utc>,
    ) -> StoreResult<Step> {
        let Some(user) = session.find_user(&request.user_id)? else {
            return Ok(Step::Refuse {
                rejection: RejectReason::UserNotFound.into(),
                audit_user: None,
            });
        };
        if !user.active {
            let reason = if self.config.reveal_inactive_users {
                RejectReason::UserInactive
            } else {
                RejectReason::UserNotFound
            };
            return Ok(Step::Refuse {
                rejection: reason.into(),
                audit_user: Some(user.id),
            });
        }

        let date = self.calendar.date_of(now);
        let checked_in = session.has_direction_on(&user.id, Direction::CheckIn, date)?;
        let conflict = match direction {
            Direction::CheckIn if checked_in => Some(Rejection::new(
                RejectReason::AlreadyCheckedIn,
                format!("already checked in on {date}"),
            )),
            Direction::CheckIn => None,
            Direction::CheckOut if !checked_in => Some(Rejection::new(
                RejectReason::NotCheckedInYet,
                format!("no check-in recorded on {date}"),
            )),
            Direction::CheckOut => session
                .has_direction_on(&user.id, Direction::CheckOut, date)?
                .then(|| {
                    Rejection::new(
                        RejectReason::AlreadyCheckedOut,
                        format!("already checked out on {date}"),
                    )
                }),
        };
        if let Some(rejection) = conflict {
            return Ok(Step::Refuse {
                rejection,
                audit_user: Some(user.id),
            });
        }

        let (decision, verification) = match &request.evidence {
            Evidence::Face { confidence } => (
                self.gate
                    .evaluate(PresentedEvidence::Face(*confidence), &user.id, now),
                Verification::FaceConfidence(*confidence),
            ),
            Evidence::Qr { code } => {
                let token = session.find_token(code)?;
                (
                    self.gate
                        .evaluate(PresentedEvidence::Qr(token.as_ref()), &user.id, now),
                    Verification::QrToken(code.clone()),
                )
            }
        };
        if let GateDecision::Reject(cause) = decision {
            return Ok(Step::Refuse {
                rejection: RejectReason::from(cause).into(),
                audit_user: Some(user.id),
            });
        }

        if let Evidence::Qr { code } = &request.evidence {
            if let Some(reason) = consume_rejection(&session.try_consume(code, now)?) {
                tracing::debug!(user = %user.id, %reason, "qr token lost at write time");
                return Ok(Step::Refuse {
                    rejection: reason.into(),
                    audit_user: Some(user.id),
                });
            }
        }

        let event = AttendanceEvent {
            id: EventId::new(),
            user_id: user.id.clone(),
            method: request.evidence.method(),
            direction,
            event_time: request.timestamp.unwrap_or(now),
            attendance_date: date,
            verification,
            location: request
                .location
                .clone()
                .unwrap_or_else(|| self.config.default_location.clone()),
            origin: request.origin.clone(),
            created_at: now,
        };

        match session.insert_event(&event) {
            Ok(_) => Ok(Step::Admit { event, user }),
            Err(StoreError::DuplicateDirection { .. }) => {
                tracing::debug!(user = %user.id, %direction, %date, "uniqueness constraint refused event");
                let reason = match direction {
                    Direction::CheckIn => RejectReason::AlreadyCheckedIn,
                    Direction::CheckOut => RejectReason::AlreadyCheckedOut,
                };
                Ok(Step::Abort {
                    rejection: reason.into(),
                    audit_user: Some(user.id),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Turn a storage error into a transient rejection, or an engine fault
    /// when retrying cannot help.
    async fn storage_failure(
        &self,
        err: StoreError,
        action: AuditAction,
        request: &AttendanceRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<TransitionOutcome> {
        let reason = match &err {
            StoreError::Conflict(_) => RejectReason::TransactionConflict,
            e if e.is_transient() => RejectReason::StorageUnavailable,
            _ => {
                tracing::error!(error = %err, user = %request.user_id, "storage fault during transition");
                let rejection = Rejection::new(RejectReason::StorageUnavailable, "internal storage fault");
                self.audit_detached(&failure_entry(&rejection, None, action, request, now))
                    .await;
                return Err(EngineError::Internal(err.to_string()));
            }
        };
        tracing::warn!(error = %err, user = %request.user_id, %reason, "transition aborted by storage");
        Ok(self
            .refuse_detached(reason.into(), None, action, request, now)
            .await)
    }

    async fn refuse_detached(
        &self,
        rejection: Rejection,
        audit_user: Option<UserId>,
        action: AuditAction,
        request: &AttendanceRequest,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        tracing::debug!(user = %request.user_id, reason = %rejection.reason, "transition refused");
        let entry = failure_entry(&rejection, audit_user, action, request, now);
        self.audit_detached(&entry).await;
        TransitionOutcome::Rejected(rejection)
    }

    /// Best-effort audit write in its own session.
    async fn audit_detached(&self, entry: &AuditEntry) {
        if let Err(err) = self.write_audit(entry).await {
            tracing::error!(error = %err, action = %entry.action, "failed to write audit entry");
        }
    }

    async fn write_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut session = self.pool.acquire().await?;
        session.record(entry)?;
        session.commit()
    }
}

fn record_in_session<S: StoreSession>(session: &mut S, entry: &AuditEntry) {
    if let Err(err) = session.record(entry) {
        tracing::error!(error = %err, action = %entry.action, "failed to write audit entry");
    }
}

fn consume_rejection(outcome: &ConsumeOutcome) -> Option<RejectReason> {
    match outcome {
        ConsumeOutcome::Consumed(_) => None,
        ConsumeOutcome::AlreadyUsed => Some(RejectReason::QrAlreadyUsed),
        ConsumeOutcome::NotYetValid => Some(RejectReason::QrNotYetValid),
        ConsumeOutcome::Expired => Some(RejectReason::QrExpired),
        ConsumeOutcome::NotFound => Some(RejectReason::QrNotFound),
    }
}

fn label(direction: Direction) -> &'static str {
    match direction {
        Direction::CheckIn => "check-in",
        Direction::CheckOut => "check-out",
    }
}

fn success_description(event: &AttendanceEvent) -> String {
    let label = label(event.direction);
    match &event.verification {
        Verification::FaceConfidence(confidence) => {
            format!("{label} via face recognition (confidence: {confidence:.2})")
        }
        Verification::QrToken(code) => {
            format!("{label} via qr code {}", code.prefix(AUDIT_CODE_PREFIX))
        }
    }
}

fn failure_entry(
    rejection: &Rejection,
    audit_user: Option<UserId>,
    action: AuditAction,
    request: &AttendanceRequest,
    now: DateTime<Utc>,
) -> AuditEntry {
    let description = match &request.evidence {
        Evidence::Qr { code } if !code.is_blank() => format!(
            "{}: {} (qr code {})",
            rejection.reason,
            rejection.message,
            code.prefix(AUDIT_CODE_PREFIX)
        ),
        _ => format!("{}: {}", rejection.reason, rejection.message),
    };
    AuditEntry::failed(audit_user, action, description, &request.origin, now)
}
