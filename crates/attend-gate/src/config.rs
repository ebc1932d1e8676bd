use serde::{Deserialize, Serialize};

/// Minimum face-match confidence admitted by the face gateway. Not
/// configurable.
pub const DEFAULT_FACE_THRESHOLD: f64 = 0.85;

/// Who may redeem a QR token that is not bound to a specific user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QrBindingPolicy {
    /// Unbound tokens are redeemable by any user; bound tokens only by
    /// their user.
    #[default]
    Open,
    /// Every token must be bound to the redeeming user.
    BoundOnly,
}

/// Configuration for the verification gateways.
///
/// Unknown keys are rejected, so a stale `face_threshold` setting fails to
/// load instead of being silently ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Policy for QR tokens without a bound user.
    pub qr_binding: QrBindingPolicy,
}
