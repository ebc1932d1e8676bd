use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Method;
use crate::identity::UserId;

/// Per-user, per-day projection of the attendance ledger.
///
/// Derived from ledger events on read; the transition engine never writes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyAttendanceSummary {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub check_in_method: Option<Method>,
    pub check_out_method: Option<Method>,
    pub face_confidence_in: Option<f64>,
    pub face_confidence_out: Option<f64>,
    /// Seconds between check-in and check-out. `None` until checked out, or
    /// when the recorded check-out precedes the check-in.
    pub work_seconds: Option<i64>,
}

impl DailyAttendanceSummary {
    pub fn check_ins(&self) -> u32 {
        u32::from(self.check_in_time.is_some())
    }

    pub fn check_outs(&self) -> u32 {
        u32::from(self.check_out_time.is_some())
    }

    /// `"8h 30m"` style rendering of the worked duration.
    pub fn duration_label(&self) -> String {
        format_duration(self.work_seconds.unwrap_or(0))
    }
}

/// Monthly rollup for one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonthlyStatistics {
    pub user_id: UserId,
    pub year: i32,
    pub month: u32,
    pub total_check_ins: u32,
    pub total_check_outs: u32,
    pub total_work_seconds: i64,
    /// Mean worked seconds over days that have a completed duration.
    pub average_daily_seconds: i64,
    /// Newest day first.
    pub daily: Vec<DailyAttendanceSummary>,
}

/// Renders whole seconds as `"{h}h {m}m"`; negative input renders as zero.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
}
