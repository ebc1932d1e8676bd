use std::time::Duration;

use attend_gate::GateConfig;
use attend_types::CalendarPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Tunables for the transition engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gate: GateConfig,
    /// Offset of the attendance calendar from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Largest accepted distance between a client timestamp and server time.
    #[serde(rename = "max_clock_skew_secs", with = "duration_secs")]
    pub max_clock_skew: Duration,
    /// Location recorded when a request does not name one.
    pub default_location: String,
    /// Report inactive users as `UserInactive` instead of `UserNotFound`.
    pub reveal_inactive_users: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            utc_offset_minutes: 0,
            max_clock_skew: Duration::from_secs(300),
            default_location: "Office".to_string(),
            reveal_inactive_users: false,
        }
    }
}

impl EngineConfig {
    /// Calendar derived from `utc_offset_minutes`.
    pub fn calendar(&self) -> EngineResult<CalendarPolicy> {
        CalendarPolicy::from_offset_minutes(self.utc_offset_minutes)
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.calendar()?;
        if self.default_location.trim().is_empty() {
            return Err(EngineError::Config("default_location must not be empty".into()));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
