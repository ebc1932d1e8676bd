use crate::config::DEFAULT_FACE_THRESHOLD;
use crate::decision::{GateDecision, RejectCause};

/// Admits a face attempt when the precomputed similarity score reaches
/// [`DEFAULT_FACE_THRESHOLD`].
///
/// Feature extraction and matching happen upstream; this gateway only sees
/// the resulting score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaceGateway;

impl FaceGateway {
    pub fn threshold(&self) -> f64 {
        DEFAULT_FACE_THRESHOLD
    }

    pub fn evaluate(&self, confidence: f64) -> GateDecision {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return GateDecision::Reject(RejectCause::InvalidConfidence);
        }
        if confidence < DEFAULT_FACE_THRESHOLD {
            return GateDecision::Reject(RejectCause::LowConfidence);
        }
        GateDecision::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn threshold_is_inclusive() {
        let gate = FaceGateway::default();
        assert_eq!(gate.evaluate(0.85), GateDecision::Admit);
        assert_eq!(
            gate.evaluate(0.8499),
            GateDecision::Reject(RejectCause::LowConfidence)
        );
    }

    #[test]
    fn out_of_range_scores_are_invalid() {
        let gate = FaceGateway::default();
        for bad in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            assert_eq!(
                gate.evaluate(bad),
                GateDecision::Reject(RejectCause::InvalidConfidence)
            );
        }
    }

    proptest! {
        #[test]
        fn admits_exactly_the_scores_at_or_above_threshold(score in 0.0f64..=1.0) {
            let gate = FaceGateway::default();
            prop_assert_eq!(gate.evaluate(score).is_admit(), score >= 0.85);
        }
    }
}
