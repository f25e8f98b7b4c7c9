//! Engine configuration.
//!
//! Plain serde structs with defaults for every field, so a partial JSON file
//! is a valid config. [`EngineConfig::validate`] is the only way to turn one
//! into runtime values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::classify::Classifier;
use crate::error::ConfigError;
use crate::lifecycle::Orchestrator;
use crate::poll::{PollSettings, WhenAbsent};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backoff: BackoffConfig,
    pub poll: PollConfig,
    pub timeouts: TimeoutConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub growth: f64,
    pub jitter: f64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            growth: 2.0,
            jitter: 0.2,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub initial_delay_ms: u64,
    /// Consecutive absent observations tolerated while a target state is
    /// expected. 0 disables the check.
    pub not_found_checks: u32,
    pub continuous_target_occurrence: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            initial_delay_ms: 0,
            not_found_checks: 20,
            continuous_target_occurrence: 1,
        }
    }
}

/// Per-operation budgets, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub create_secs: u64,
    pub update_secs: u64,
    pub delete_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            create_secs: 600,
            update_secs: 600,
            delete_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub extra_retryable_codes: Vec<String>,
    pub extra_not_found_codes: Vec<String>,
}

/// Validated runtime values.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backoff: BackoffPolicy,
    pub poll: PollSettings,
    pub classifier: Classifier,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Settings {
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.backoff, self.classifier.clone(), self.poll)
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let backoff = BackoffPolicy::new(
            Duration::from_millis(self.backoff.base_ms),
            self.backoff.growth,
            self.backoff.jitter,
            Duration::from_millis(self.backoff.max_ms),
        )?;

        let when_absent = match self.poll.not_found_checks {
            0 => WhenAbsent::Pending,
            n => WhenAbsent::FailAfter(n),
        };
        let poll = PollSettings::new(Duration::from_millis(self.poll.interval_ms))?
            .with_initial_delay(Duration::from_millis(self.poll.initial_delay_ms))
            .with_when_absent(when_absent)
            .with_continuous_target_occurrence(self.poll.continuous_target_occurrence)?;

        let t = &self.timeouts;
        if t.create_secs == 0 || t.update_secs == 0 || t.delete_secs == 0 {
            return Err(ConfigError::invalid("timeouts", "must be non-zero"));
        }
        let timeouts = Timeouts {
            create: Duration::from_secs(t.create_secs),
            update: Duration::from_secs(t.update_secs),
            delete: Duration::from_secs(t.delete_secs),
        };

        let classifier = Classifier::default()
            .with_retryable_codes(self.classifier.extra_retryable_codes.iter().cloned())
            .with_not_found_codes(self.classifier.extra_not_found_codes.iter().cloned());

        Ok(Settings {
            backoff,
            poll,
            classifier,
            timeouts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_validate() {
        let settings = assert_ok!(EngineConfig::default().validate());
        assert_eq!(settings.backoff, BackoffPolicy::default());
        assert_eq!(settings.poll.interval(), Duration::from_secs(2));
        assert_eq!(settings.timeouts.delete, Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "backoff": { "base_ms": 100 },
                "poll": { "interval_ms": 250, "not_found_checks": 0 },
                "classifier": { "extra_retryable_codes": ["OTSIndexBuilding"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.backoff.base_ms, 100);
        assert_eq!(config.backoff.max_ms, 30_000);
        assert_eq!(config.timeouts, TimeoutConfig::default());

        let settings = assert_ok!(config.validate());
        assert_eq!(settings.backoff.base(), Duration::from_millis(100));
        assert_eq!(settings.poll.interval(), Duration::from_millis(250));
        assert!(
            settings
                .classifier
                .is_retryable(&ApiError::service("OTSIndexBuilding", ""))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = EngineConfig::default();
        config.backoff.jitter = 3.0;
        assert_err!(config.validate());

        let mut config = EngineConfig::default();
        config.poll.interval_ms = 0;
        assert_err!(config.validate());

        let mut config = EngineConfig::default();
        config.timeouts.create_secs = 0;
        assert_err!(config.validate());

        let mut config = EngineConfig::default();
        config.backoff.max_ms = 10;
        assert_err!(config.validate());

        let mut config = EngineConfig::default();
        config.backoff.base_ms = 0;
        assert_err!(config.validate());
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/converge.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
