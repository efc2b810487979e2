//! Replay parameters handed to the coordinator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ReplayError;
use feed_records::DEFAULT_TIMESTAMP_FIELD;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Destination names for the two paired streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Destinations {
    pub transactions: String,
    pub labels: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            transactions: "qs_transactions".into(),
            labels: "qs_transaction_labels".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Rows per batch; must be at least one.
    pub batch_size: usize,
    /// Wait between consecutive steps, written as `"100ms"`, `"2s"`, ...
    #[serde(with = "delay_format")]
    pub delay: Duration,
    /// Field shifted by the session's start timestamp when present.
    pub timestamp_field: String,
    pub destinations: Destinations,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delay: DEFAULT_DELAY,
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.into(),
            destinations: Destinations::default(),
        }
    }
}

impl ReplaySettings {
    #[must_use]
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size,
            delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_destinations(
        mut self,
        transactions: impl Into<String>,
        labels: impl Into<String>,
    ) -> Self {
        self.destinations = Destinations {
            transactions: transactions.into(),
            labels: labels.into(),
        };
        self
    }

    #[must_use]
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.batch_size == 0 {
            return Err(ReplayError::Precondition(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.destinations.transactions.trim().is_empty()
            || self.destinations.labels.trim().is_empty()
        {
            return Err(ReplayError::Precondition(
                "destination names must not be empty".into(),
            ));
        }
        Ok(())
    }
}

mod delay_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*delay).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
