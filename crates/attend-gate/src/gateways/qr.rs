use attend_types::{QrToken, Redeemability, UserId};
use chrono::{DateTime, Utc};

use crate::config::QrBindingPolicy;
use crate::decision::{GateDecision, RejectCause};

/// Decides whether a QR token may be redeemed by `subject` at `now`.
///
/// The gateway only decides. Consuming the token is the caller's job and
/// must be re-validated atomically at write time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QrGateway {
    binding: QrBindingPolicy,
}

impl QrGateway {
    pub fn new(binding: QrBindingPolicy) -> Self {
        Self { binding }
    }

    pub fn binding(&self) -> QrBindingPolicy {
        self.binding
    }

    /// `token` is `None` when no token with the presented code exists.
    pub fn evaluate(
        &self,
        token: Option<&QrToken>,
        subject: &UserId,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let Some(token) = token else {
            return GateDecision::Reject(RejectCause::QrNotFound);
        };

        match token.redeemability(now) {
            Redeemability::Redeemable => {}
            Redeemability::AlreadyUsed => return GateDecision::Reject(RejectCause::QrAlreadyUsed),
            Redeemability::NotYetValid => return GateDecision::Reject(RejectCause::QrNotYetValid),
            Redeemability::Expired => return GateDecision::Reject(RejectCause::QrExpired),
        }

        let bound_ok = match (&token.bound_user_id, self.binding) {
            (Some(bound), _) => bound == subject,
            (None, QrBindingPolicy::Open) => true,
            (None, QrBindingPolicy::BoundOnly) => false,
        };
        if !bound_ok {
            return GateDecision::Reject(RejectCause::QrWrongUser);
        }

        GateDecision::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 12, 7, 0, 0).unwrap()
    }

    fn shift_token(bound: Option<&str>) -> QrToken {
        QrToken::issue("QR-SHIFT-0112", bound.map(UserId::from), t0(), t0() + Duration::hours(8))
    }

    #[test]
    fn missing_token_is_not_found() {
        let gate = QrGateway::default();
        assert_eq!(
            gate.evaluate(None, &UserId::from("emp-1"), t0()),
            GateDecision::Reject(RejectCause::QrNotFound)
        );
    }

    #[test]
    fn token_nine_hours_after_issue_is_expired() {
        let gate = QrGateway::default();
        let token = shift_token(None);
        assert_eq!(
            gate.evaluate(Some(&token), &UserId::from("emp-1"), t0() + Duration::hours(9)),
            GateDecision::Reject(RejectCause::QrExpired)
        );
    }

    #[test]
    fn bound_token_only_admits_its_user() {
        let gate = QrGateway::default();
        let token = shift_token(Some("emp-1"));
        let now = t0() + Duration::hours(1);
        assert!(gate.evaluate(Some(&token), &UserId::from("emp-1"), now).is_admit());
        assert_eq!(
            gate.evaluate(Some(&token), &UserId::from("emp-2"), now),
            GateDecision::Reject(RejectCause::QrWrongUser)
        );
    }

    #[test]
    fn bound_only_policy_refuses_unbound_tokens() {
        let token = shift_token(None);
        let now = t0() + Duration::hours(1);

        let open = QrGateway::new(QrBindingPolicy::Open);
        assert!(open.evaluate(Some(&token), &UserId::from("emp-9"), now).is_admit());

        let strict = QrGateway::new(QrBindingPolicy::BoundOnly);
        assert_eq!(
            strict.evaluate(Some(&token), &UserId::from("emp-9"), now),
            GateDecision::Reject(RejectCause::QrWrongUser)
        );
    }

    #[test]
    fn used_token_is_rejected() {
        let gate = QrGateway::default();
        let mut token = shift_token(None);
        token.used = true;
        token.usage_count = 1;
        assert_eq!(
            gate.evaluate(Some(&token), &UserId::from("emp-1"), t0() + Duration::hours(1)),
            GateDecision::Reject(RejectCause::QrAlreadyUsed)
        );
    }
}
