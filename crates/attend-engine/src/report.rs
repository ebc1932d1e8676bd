use std::collections::BTreeMap;
use std::sync::Arc;

use attend_store::{
    AttendanceLedger, AuditTrail, SessionPool, SessionProvider, StoreResult, TokenStore,
    MAX_HISTORY_ROWS,
};
use attend_types::{
    AttendanceEvent, AuditEntry, CalendarPolicy, CallerIdentity, Clock, DailyAttendanceSummary,
    Direction, MonthlyStatistics, Redeemability, TokenCode, UserId,
};
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReportError, ReportResult};

/// Status of a QR code as seen by a scanner before redemption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrValidation {
    /// Leading characters of the code, never the whole credential.
    pub code_prefix: String,
    pub is_valid: bool,
    pub status: Redeemability,
    pub bound_user_id: Option<UserId>,
    pub valid_for_date: NaiveDate,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Read-only views over the attendance ledger, QR tokens and audit trail.
///
/// Every read runs in its own pooled session and is rolled back, so reports
/// never hold writes open.
pub struct AttendanceReports<P: SessionProvider> {
    pool: SessionPool<P>,
    calendar: CalendarPolicy,
    clock: Arc<dyn Clock>,
}

impl<P: SessionProvider> AttendanceReports<P> {
    pub fn new(pool: SessionPool<P>, calendar: CalendarPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            calendar,
            clock,
        }
    }

    /// Events for `user_id`, newest first, optionally bounded by inclusive
    /// dates. At most [`MAX_HISTORY_ROWS`] rows.
    pub async fn history(
        &self,
        caller: &CallerIdentity,
        user_id: &UserId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> ReportResult<Vec<AttendanceEvent>> {
        authorize(caller, user_id)?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ReportError::InvalidInput(format!(
                    "start date {from} is after end date {to}"
                )));
            }
        }
        let limit = limit.unwrap_or(MAX_HISTORY_ROWS).min(MAX_HISTORY_ROWS);
        self.read(|s| s.events_for_user(user_id, from, to, limit)).await
    }

    /// Today's summary for `user_id`, or `None` before the first event.
    pub async fn today(
        &self,
        caller: &CallerIdentity,
        user_id: &UserId,
    ) -> ReportResult<Option<DailyAttendanceSummary>> {
        authorize(caller, user_id)?;
        let date = self.calendar.date_of(self.clock.now());
        let events = self
            .read(|s| s.events_for_user(user_id, Some(date), Some(date), MAX_HISTORY_ROWS))
            .await?;
        Ok(summarize_day(user_id, date, &events))
    }

    /// Rollup of one calendar month.
    pub async fn monthly_statistics(
        &self,
        caller: &CallerIdentity,
        user_id: &UserId,
        year: i32,
        month: u32,
    ) -> ReportResult<MonthlyStatistics> {
        authorize(caller, user_id)?;
        let (first, last) = month_bounds(year, month)?;
        let events = self
            .read(|s| s.events_for_user(user_id, Some(first), Some(last), MAX_HISTORY_ROWS))
            .await?;
        Ok(monthly_rollup(user_id, year, month, &events))
    }

    /// Inspect a QR code without consuming it.
    pub async fn validate_qr(&self, code: &TokenCode) -> ReportResult<QrValidation> {
        if code.is_blank() {
            return Err(ReportError::InvalidInput("qr_code is required".into()));
        }
        let token = self
            .read(|s| s.find_token(code))
            .await?
            .ok_or(ReportError::QrNotFound)?;
        let status = token.redeemability(self.clock.now());
        Ok(QrValidation {
            code_prefix: token.code.prefix(10).to_string(),
            is_valid: status == Redeemability::Redeemable,
            status,
            bound_user_id: token.bound_user_id,
            valid_for_date: self.calendar.date_of(token.valid_from),
            valid_from: token.valid_from,
            valid_until: token.valid_until,
        })
    }

    /// Audit entries, newest first. Without a subject, only elevated callers
    /// may read the whole trail.
    pub async fn audit_entries(
        &self,
        caller: &CallerIdentity,
        subject: Option<&UserId>,
        limit: usize,
    ) -> ReportResult<Vec<AuditEntry>> {
        match subject {
            Some(user_id) => {
                authorize(caller, user_id)?;
                self.read(|s| s.entries_for_user(user_id, limit)).await
            }
            None if caller.elevated => self.read(|s| s.recent_entries(limit)).await,
            None => Err(ReportError::AccessDenied {
                caller: caller.user_id.clone(),
                subject: UserId::new("*"),
            }),
        }
    }

    async fn read<T, F>(&self, f: F) -> ReportResult<T>
    where
        F: FnOnce(&mut P::Session) -> StoreResult<T> + Send,
    {
        let mut session = self.pool.acquire_read().await?;
        let value = f(&mut *session)?;
        session.rollback()?;
        Ok(value)
    }
}

fn authorize(caller: &CallerIdentity, subject: &UserId) -> ReportResult<()> {
    if caller.may_access(subject) {
        Ok(())
    } else {
        Err(ReportError::AccessDenied {
            caller: caller.user_id.clone(),
            subject: subject.clone(),
        })
    }
}

fn month_bounds(year: i32, month: u32) -> ReportResult<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ReportError::InvalidInput(format!("no such month: {year}-{month:02}")))?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| ReportError::InvalidInput(format!("no such month: {year}-{month:02}")))?;
    Ok((first, last))
}

/// Project one day's events onto a summary. `None` when the day has no
/// events.
pub fn summarize_day(
    user_id: &UserId,
    date: NaiveDate,
    events: &[AttendanceEvent],
) -> Option<DailyAttendanceSummary> {
    let on_day = |direction: Direction| {
        events
            .iter()
            .find(|e| e.attendance_date == date && e.direction == direction)
    };
    let check_in = on_day(Direction::CheckIn);
    let check_out = on_day(Direction::CheckOut);
    if check_in.is_none() && check_out.is_none() {
        return None;
    }

    let work_seconds = match (check_in, check_out) {
        (Some(i), Some(o)) if o.event_time >= i.event_time => {
            Some((o.event_time - i.event_time).num_seconds())
        }
        _ => None,
    };
    Some(DailyAttendanceSummary {
        user_id: user_id.clone(),
        date,
        check_in_time: check_in.map(|e| e.event_time),
        check_out_time: check_out.map(|e| e.event_time),
        check_in_method: check_in.map(|e| e.method),
        check_out_method: check_out.map(|e| e.method),
        face_confidence_in: check_in.and_then(|e| e.verification.face_confidence()),
        face_confidence_out: check_out.and_then(|e| e.verification.face_confidence()),
        work_seconds,
    })
}

/// Aggregate a month of events into per-day summaries (newest first) and
/// totals.
pub fn monthly_rollup(
    user_id: &UserId,
    year: i32,
    month: u32,
    events: &[AttendanceEvent],
) -> MonthlyStatistics {
    let mut days: BTreeMap<NaiveDate, Vec<AttendanceEvent>> = BTreeMap::new();
    for event in events {
        days.entry(event.attendance_date)
            .or_default()
            .push(event.clone());
    }
    let daily: Vec<DailyAttendanceSummary> = days
        .iter()
        .rev()
        .filter_map(|(date, events)| summarize_day(user_id, *date, events))
        .collect();

    let total_check_ins = daily.iter().map(DailyAttendanceSummary::check_ins).sum();
    let total_check_outs = daily.iter().map(DailyAttendanceSummary::check_outs).sum();
    let worked: Vec<i64> = daily.iter().filter_map(|d| d.work_seconds).collect();
    let total_work_seconds: i64 = worked.iter().sum();
    let average_daily_seconds = match i64::try_from(worked.len()) {
        Ok(n) if n > 0 => total_work_seconds / n,
        _ => 0,
    };

    MonthlyStatistics {
        user_id: user_id.clone(),
        year,
        month,
        total_check_ins,
        total_check_outs,
        total_work_seconds,
        average_daily_seconds,
        daily,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_store::{InMemoryStore, PoolConfig};
    use attend_types::{EventId, FixedClock, Method, Origin, QrToken, Verification};
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, day, hour, minute, 0).unwrap()
    }

    fn event(direction: Direction, time: DateTime<Utc>, verification: Verification) -> AttendanceEvent {
        AttendanceEvent {
            id: EventId::new(),
            user_id: UserId::from("emp-1"),
            method: verification.method(),
            direction,
            event_time: time,
            attendance_date: time.date_naive(),
            verification,
            location: "Office".into(),
            origin: Origin::default(),
            created_at: time,
        }
    }

    fn reports(store: InMemoryStore, now: DateTime<Utc>) -> AttendanceReports<InMemoryStore> {
        AttendanceReports::new(
            SessionPool::new(store, PoolConfig::default()),
            CalendarPolicy::utc(),
            Arc::new(FixedClock::new(now)),
        )
    }

    #[test]
    fn day_summary_computes_duration() {
        let user = UserId::from("emp-1");
        let events = vec![
            event(Direction::CheckOut, at(3, 17, 30), Verification::QrToken(TokenCode::new("QR-1"))),
            event(Direction::CheckIn, at(3, 9, 0), Verification::FaceConfidence(0.91)),
        ];
        let summary = summarize_day(&user, at(3, 0, 0).date_naive(), &events).unwrap();
        assert_eq!(summary.work_seconds, Some(8 * 3600 + 30 * 60));
        assert_eq!(summary.duration_label(), "8h 30m");
        assert_eq!(summary.check_in_method, Some(Method::Face));
        assert_eq!(summary.check_out_method, Some(Method::Qr));
        assert_eq!(summary.face_confidence_in, Some(0.91));
        assert_eq!(summary.face_confidence_out, None);
    }

    #[test]
    fn check_out_before_check_in_has_no_duration() {
        let user = UserId::from("emp-1");
        let events = vec![
            event(Direction::CheckIn, at(3, 9, 0), Verification::FaceConfidence(0.9)),
            event(Direction::CheckOut, at(3, 8, 0), Verification::FaceConfidence(0.9)),
        ];
        let summary = summarize_day(&user, at(3, 0, 0).date_naive(), &events).unwrap();
        assert_eq!(summary.work_seconds, None);
        assert!(summarize_day(&user, at(4, 0, 0).date_naive(), &events).is_none());
    }

    #[test]
    fn monthly_rollup_totals_and_orders_days() {
        let user = UserId::from("emp-1");
        let face = || Verification::FaceConfidence(0.9);
        let events = vec![
            event(Direction::CheckIn, at(1, 9, 0), face()),
            event(Direction::CheckOut, at(1, 17, 0), face()),
            event(Direction::CheckIn, at(2, 9, 0), face()),
            event(Direction::CheckOut, at(2, 13, 0), face()),
            event(Direction::CheckIn, at(3, 9, 0), face()),
        ];
        let stats = monthly_rollup(&user, 2026, 7, &events);
        assert_eq!(stats.total_check_ins, 3);
        assert_eq!(stats.total_check_outs, 2);
        assert_eq!(stats.total_work_seconds, 12 * 3600);
        assert_eq!(stats.average_daily_seconds, 6 * 3600);
        let days: Vec<u32> = stats.daily.iter().map(|d| chrono::Datelike::day(&d.date)).collect();
        assert_eq!(days, vec![3, 2, 1]);
    }

    #[test]
    fn month_bounds_cover_whole_month() {
        let (first, last) = month_bounds(2028, 2).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2028, 2, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2028, 2, 29).unwrap());
        assert!(matches!(month_bounds(2026, 13), Err(ReportError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn reads_are_limited_to_subject_or_admin() {
        let r = reports(InMemoryStore::new(), at(3, 12, 0));
        let bob = CallerIdentity::user("bob");
        let err = r
            .history(&bob, &UserId::from("emp-1"), None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::AccessDenied { .. }));
        assert!(r.audit_entries(&bob, None, 10).await.is_err());

        let admin = CallerIdentity::admin("hr");
        assert!(r
            .history(&admin, &UserId::from("emp-1"), None, None, None)
            .await
            .unwrap()
            .is_empty());
        assert!(r.today(&admin, &UserId::from("emp-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn validate_qr_reports_window_without_consuming() {
        let store = InMemoryStore::new();
        let now = at(3, 10, 0);
        {
            let pool = SessionPool::new(store.clone(), PoolConfig::default());
            let mut session = pool.acquire().await.unwrap();
            session
                .issue_token(&QrToken::issue(
                    "QR-0703-MORNING",
                    Some(UserId::from("emp-1")),
                    at(3, 7, 0),
                    at(3, 7, 0) + Duration::hours(8),
                ))
                .unwrap();
            session.commit().unwrap();
        }

        let r = reports(store, now);
        let report = r.validate_qr(&TokenCode::new("QR-0703-MORNING")).await.unwrap();
        assert!(report.is_valid);
        assert_eq!(report.status, Redeemability::Redeemable);
        assert_eq!(report.code_prefix, "QR-0703-MO");
        assert_eq!(report.valid_for_date, at(3, 0, 0).date_naive());

        // Still valid on a second look: validation never consumes.
        assert!(r.validate_qr(&TokenCode::new("QR-0703-MORNING")).await.unwrap().is_valid);
        assert!(matches!(
            r.validate_qr(&TokenCode::new("QR-MISSING")).await,
            Err(ReportError::QrNotFound)
        ));
    }
}
