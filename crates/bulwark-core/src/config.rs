//! Policy configuration for the combinators.
//!
//! Durations are written in human-readable form (`"250ms"`, `"2s"`,
//! `"1m 30s"`). Every section has defaults, so a file only needs to name
//! what it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Backoff after the threshold is first reached; doubles per extra failure
    #[serde(with = "duration_str")]
    pub base_backoff: Duration,

    /// Upper bound on the backoff window (uncapped when absent)
    #[serde(with = "option_duration_str", skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<Duration>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: None,
        }
    }
}

impl BreakerConfig {
    fn problems(&self, out: &mut Vec<String>) {
        if self.base_backoff.is_zero() {
            out.push("breaker.base_backoff must be greater than zero".to_string());
        }
        if matches!(self.max_backoff, Some(max) if max < self.base_backoff) {
            out.push("breaker.max_backoff must not be below base_backoff".to_string());
        }
    }
}

/// Token bucket configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Bucket capacity (and initial token count)
    pub max: u32,

    /// Tokens added per period
    pub refill: u32,

    /// Refill period
    #[serde(with = "duration_str")]
    pub period: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max: 3,
            refill: 3,
            period: Duration::from_secs(1),
        }
    }
}

impl ThrottleConfig {
    fn problems(&self, out: &mut Vec<String>) {
        if self.max == 0 {
            out.push("throttle.max must be greater than zero".to_string());
        }
        if self.period.is_zero() {
            out.push("throttle.period must be greater than zero".to_string());
        }
    }
}

/// Debounce configuration, shared by the leading and trailing variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Quiet period
    #[serde(with = "duration_str")]
    pub window: Duration,

    /// How often the trailing poller checks for quiescence
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl DebounceConfig {
    /// Config with the given window and the default poll interval.
    pub fn window(window: Duration) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }

    fn problems(&self, out: &mut Vec<String>) {
        if self.poll_interval.is_zero() {
            out.push("debounce.poll_interval must be greater than zero".to_string());
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Highest attempt index that still retries; upstream sees at most `max_retries + 2` calls
    pub max_retries: u32,

    /// Fixed delay between attempts
    #[serde(with = "duration_str")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Deadline applied by callers building a context for a timed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "duration_str")]
    pub deadline: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(1),
        }
    }
}

/// All policies in one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub breaker: BreakerConfig,
    pub throttle: ThrottleConfig,
    pub debounce: DebounceConfig,
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
}

impl ResilienceConfig {
    /// Parse from YAML and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Check every section, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        self.breaker.problems(&mut problems);
        self.throttle.problems(&mut problems);
        self.debounce.problems(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod option_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
