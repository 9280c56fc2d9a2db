use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time weather observation for one city.
///
/// `temperature` is in the producing provider's native unit; no conversion
/// happens here. `source` names the provider that produced the record and
/// `cached` is forced to `true` when the record was served from a cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub city: String,
    pub temperature: f64,
    pub humidity: u8,
    pub condition: String,
    pub source: String,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

impl WeatherRecord {
    /// Fresh record stamped with the current time.
    pub fn observed_now(
        city: impl Into<String>,
        temperature: f64,
        humidity: u8,
        condition: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            city: city.into(),
            temperature,
            humidity,
            condition: condition.into(),
            source: source.into(),
            cached: false,
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time read of the process counters.
///
/// Each field is loaded independently, so the five values are not a
/// consistent cut across concurrent resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub api_calls: u64,
    pub rate_limit_hits: u64,
}
