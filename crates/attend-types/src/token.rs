use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// The printed value of a QR credential.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenCode(String);

impl TokenCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// At most the first `n` characters, for log and audit lines that must
    /// not carry the whole credential.
    pub fn prefix(&self, n: usize) -> &str {
        match self.0.char_indices().nth(n) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Debug for TokenCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenCode({}...)", self.prefix(10))
    }
}

impl fmt::Display for TokenCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single-use, time-boxed QR credential.
///
/// Issued externally. The only mutation the attendance core performs is the
/// one-time `used = false -> true` transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrToken {
    pub code: TokenCode,
    /// When set, only this user may redeem the token.
    pub bound_user_id: Option<UserId>,
    pub valid_from: DateTime<Utc>,
    /// Exclusive upper bound of the validity window.
    pub valid_until: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub usage_count: u32,
}

impl QrToken {
    /// A fresh, unused token valid over `[valid_from, valid_until)`.
    pub fn issue(
        code: impl Into<String>,
        bound_user_id: Option<UserId>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            code: TokenCode::new(code),
            bound_user_id,
            valid_from,
            valid_until,
            used: false,
            used_at: None,
            usage_count: 0,
        }
    }

    /// `valid_from <= now < valid_until`.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.valid_until
    }

    /// Whether the token could be consumed at `now`, ignoring user binding.
    ///
    /// A used token reports `AlreadyUsed` even when its window has also
    /// closed.
    pub fn redeemability(&self, now: DateTime<Utc>) -> Redeemability {
        if self.used {
            Redeemability::AlreadyUsed
        } else if now < self.valid_from {
            Redeemability::NotYetValid
        } else if now >= self.valid_until {
            Redeemability::Expired
        } else {
            Redeemability::Redeemable
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Redeemability {
    Redeemable,
    AlreadyUsed,
    NotYetValid,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn validity_window_is_half_open() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let token = QrToken::issue("QR-ABC", None, t0, t0 + Duration::hours(8));

        assert!(!token.is_within_window(t0 - Duration::seconds(1)));
        assert!(token.is_within_window(t0));
        assert!(token.is_within_window(t0 + Duration::hours(8) - Duration::seconds(1)));
        assert!(!token.is_within_window(t0 + Duration::hours(8)));
    }

    #[test]
    fn redeemability_prefers_used_over_window() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let mut token = QrToken::issue("QR-ABC", None, t0, t0 + Duration::hours(8));

        assert_eq!(token.redeemability(t0 - Duration::minutes(1)), Redeemability::NotYetValid);
        assert_eq!(token.redeemability(t0 + Duration::hours(1)), Redeemability::Redeemable);
        assert_eq!(token.redeemability(t0 + Duration::hours(9)), Redeemability::Expired);

        token.used = true;
        assert_eq!(token.redeemability(t0 + Duration::hours(9)), Redeemability::AlreadyUsed);
    }

    #[test]
    fn prefix_truncates_on_char_boundaries() {
        let code = TokenCode::new("ABCDEFGHIJKLMNOP");
        assert_eq!(code.prefix(10), "ABCDEFGHIJ");
        assert_eq!(TokenCode::new("short").prefix(10), "short");
        assert_eq!(TokenCode::new("ééééé").prefix(2), "éé");
    }
}
