use attend_types::{Method, QrToken, UserId};
use chrono::{DateTime, Utc};

use crate::config::GateConfig;
use crate::decision::GateDecision;
use crate::gateways::{FaceGateway, QrGateway};

/// Evidence as collected for one admission attempt.
#[derive(Clone, Copy, Debug)]
pub enum PresentedEvidence<'a> {
    /// Precomputed face-match confidence.
    Face(f64),
    /// The stored token looked up by its presented code, if any.
    Qr(Option<&'a QrToken>),
}

impl PresentedEvidence<'_> {
    pub fn method(&self) -> Method {
        match self {
            Self::Face(_) => Method::Face,
            Self::Qr(_) => Method::Qr,
        }
    }
}

/// Both verification gateways behind one configured entry point.
///
/// Stateless: every decision is a pure function of the evidence, the
/// subject and `now`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VerificationGate {
    face: FaceGateway,
    qr: QrGateway,
}

impl VerificationGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            face: FaceGateway,
            qr: QrGateway::new(config.qr_binding),
        }
    }

    pub fn face(&self) -> &FaceGateway {
        &self.face
    }

    pub fn qr(&self) -> &QrGateway {
        &self.qr
    }

    /// Route the evidence to the matching gateway.
    pub fn evaluate(
        &self,
        evidence: PresentedEvidence<'_>,
        subject: &UserId,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let decision = match evidence {
            PresentedEvidence::Face(confidence) => self.face.evaluate(confidence),
            PresentedEvidence::Qr(token) => self.qr.evaluate(token, subject, now),
        };
        tracing::debug!(
            user = %subject,
            method = %evidence.method(),
            ?decision,
            "verification gate evaluated"
        );
        decision
    }
}
