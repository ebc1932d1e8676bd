use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Source of "now" for the attendance core.
///
/// Injected rather than read from the system directly so that validity
/// windows and calendar-day boundaries are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for tests and replays.
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

impl fmt::Debug for FixedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedClock({})", self.now())
    }
}

/// Maps instants onto calendar days.
///
/// "One check-in per day" is only meaningful relative to a local calendar;
/// the policy pins that calendar to a fixed UTC offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct CalendarPolicy {
    offset: FixedOffset,
}

impl CalendarPolicy {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// A calendar at `minutes` east of UTC (e.g. `420` for UTC+07:00).
    pub fn from_offset_minutes(minutes: i32) -> Result<Self, TypeError> {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(TypeError::InvalidOffset(minutes))?;
        Ok(Self { offset })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    /// The calendar date `at` falls on under this policy.
    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }
}

impl Default for CalendarPolicy {
    fn default() -> Self {
        Self::utc()
    }
}

impl TryFrom<i32> for CalendarPolicy {
    type Error = TypeError;

    fn try_from(minutes: i32) -> Result<Self, Self::Error> {
        Self::from_offset_minutes(minutes)
    }
}

impl From<CalendarPolicy> for i32 {
    fn from(policy: CalendarPolicy) -> Self {
        policy.offset_minutes()
    }
}
