//! Recognized configuration surface: the keys a host supplies when
//! constructing an [`Enumerator`](crate::enumerator::Enumerator),
//! defined the way `models` crate configuration types are — plain
//! `serde`-derived structs with field-level defaults, validated by a
//! fallible constructor rather than at every call site.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EnumeratorError, Result};
use crate::split_tracker::InitialPositionMode;

fn default_initial_position() -> InitialPositionConfig {
    InitialPositionConfig::Latest
}

fn default_shard_discovery_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_inconsistency_resolution_retry_count() -> usize {
    5
}

/// The three recognized string values for the `initial-position`
/// configuration key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialPositionConfig {
    TrimHorizon,
    Latest,
    AtTimestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumeratorConfig {
    #[serde(default = "default_initial_position")]
    pub initial_position: InitialPositionConfig,

    /// Required, and only meaningful, when `initial_position` is
    /// `AtTimestamp`. Validated in [`EnumeratorConfig::initial_position_mode`].
    #[serde(default)]
    pub initial_timestamp: Option<DateTime<Utc>>,

    #[serde(default = "default_shard_discovery_interval", with = "humantime_serde")]
    pub shard_discovery_interval: Duration,

    #[serde(default = "default_inconsistency_resolution_retry_count")]
    pub inconsistency_resolution_retry_count: usize,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            initial_position: default_initial_position(),
            initial_timestamp: None,
            shard_discovery_interval: default_shard_discovery_interval(),
            inconsistency_resolution_retry_count: default_inconsistency_resolution_retry_count(),
        }
    }
}

impl EnumeratorConfig {
    /// Resolves the configured `initial_position`/`initial_timestamp`
    /// pair into the runtime anchor mode consumed by `SplitTracker`,
    /// enforcing that `AT_TIMESTAMP` always carries a timestamp.
    pub fn initial_position_mode(&self) -> Result<InitialPositionMode> {
        match (self.initial_position, self.initial_timestamp) {
            (InitialPositionConfig::TrimHorizon, _) => Ok(InitialPositionMode::TrimHorizon),
            (InitialPositionConfig::Latest, _) => Ok(InitialPositionMode::Latest),
            (InitialPositionConfig::AtTimestamp, Some(at)) => {
                Ok(InitialPositionMode::AtTimestamp(at))
            }
            (InitialPositionConfig::AtTimestamp, None) => {
                Err(EnumeratorError::MissingInitialTimestamp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_latest_with_ten_minute_interval() {
        let config = EnumeratorConfig::default();
        assert_eq!(config.initial_position, InitialPositionConfig::Latest);
        assert_eq!(config.shard_discovery_interval, Duration::from_secs(600));
        assert_eq!(config.inconsistency_resolution_retry_count, 5);
        assert!(matches!(
            config.initial_position_mode().unwrap(),
            InitialPositionMode::Latest
        ));
    }

    #[test]
    fn at_timestamp_without_a_timestamp_is_rejected() {
        let config = EnumeratorConfig {
            initial_position: InitialPositionConfig::AtTimestamp,
            ..EnumeratorConfig::default()
        };
        assert!(matches!(
            config.initial_position_mode(),
            Err(EnumeratorError::MissingInitialTimestamp)
        ));
    }

    #[test]
    fn at_timestamp_with_a_timestamp_resolves() {
        let at = Utc::now();
        let config = EnumeratorConfig {
            initial_position: InitialPositionConfig::AtTimestamp,
            initial_timestamp: Some(at),
            ..EnumeratorConfig::default()
        };
        assert!(matches!(
            config.initial_position_mode().unwrap(),
            InitialPositionMode::AtTimestamp(got) if got == at
        ));
    }

    #[test]
    fn deserializes_from_json_with_defaults() {
        let config: EnumeratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.initial_position, InitialPositionConfig::Latest);

        let config: EnumeratorConfig = serde_json::from_str(
            r#"{"initial_position": "TRIM_HORIZON", "shard_discovery_interval": "30s"}"#,
        )
        .unwrap();
        assert_eq!(config.initial_position, InitialPositionConfig::TrimHorizon);
        assert_eq!(config.shard_discovery_interval, Duration::from_secs(30));
    }
}
