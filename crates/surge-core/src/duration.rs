//! Human-readable durations (`30s`, `2m`, `5m 30s`, `500ms`) for scenario files.

use crate::error::{ConfigError, ConfigResult};
use std::time::Duration;

/// Parse a humantime duration, naming the field in the error.
pub fn parse_duration(field: &str, value: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Render a duration the same way scenario files spell it.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// `#[serde(with = "surge_core::duration::serde_humantime")]`
pub mod serde_humantime {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
