//! Verification gateways for attendance admission.
//!
//! A gateway converts already-collected evidence into an admit/reject
//! decision. Gateways are pure: they never touch storage and never consume
//! QR tokens, which keeps "decide" and "mutate" separately testable.
//!
//! # Quick Start
//!
//! ```rust
//! use attend_gate::{GateConfig, GateDecision, PresentedEvidence, RejectCause, VerificationGate};
//! use attend_types::UserId;
//! use chrono::Utc;
//!
//! let gate = VerificationGate::new(&GateConfig::default());
//! let subject = UserId::from("emp-001");
//! let decision = gate.evaluate(PresentedEvidence::Face(0.80), &subject, Utc::now());
//! assert_eq!(decision, GateDecision::Reject(RejectCause::LowConfidence));
//! ```

pub mod config;
pub mod decision;
pub mod gate;
pub mod gateways;

pub use config::{GateConfig, QrBindingPolicy, DEFAULT_FACE_THRESHOLD};
pub use decision::{GateDecision, RejectCause};
pub use gate::{PresentedEvidence, VerificationGate};
pub use gateways::{FaceGateway, QrGateway};
