//! rule configuration as a scan rule adapter supplies it
//!
//! values are kept as strings, the way scanner configuration files store them, and
//! interpreted on access. Unusable sleep times fall back to the default without failing.
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::budget::{AlertThreshold, AttackStrength};
use crate::error::BlindTimingError;
use crate::sequencers::DEFAULT_SLEEP_SECONDS;

/// key holding the sleep time, in seconds, shared by all timing-based rules
pub const RULE_COMMON_SLEEP_TIME: &str = "rules.common.sleep";

/// key holding the rule's attack strength
pub const RULE_ATTACK_STRENGTH: &str = "rules.attack.strength";

/// key holding the rule's alert threshold
pub const RULE_ALERT_THRESHOLD: &str = "rules.alert.threshold";

/// string key/value configuration for a single scan rule
///
/// # Examples
///
/// ```
/// use blindtiming::config::{RuleConfig, RULE_COMMON_SLEEP_TIME};
///
/// let config = RuleConfig::new().with(RULE_COMMON_SLEEP_TIME, "not a number");
///
/// // malformed values fall back to the 5 second default
/// assert_eq!(config.sleep_time(), 5.0);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RuleConfig {
    values: HashMap<String, String>,
}

impl RuleConfig {
    /// create an empty `RuleConfig`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// builder-style setter
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// set `key` to `value`, replacing any earlier value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// raw string value of `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// sleep time in seconds used as the base delay of timing-based rules
    ///
    /// missing, non-numeric, non-positive, or non-finite values silently fall back to
    /// [`DEFAULT_SLEEP_SECONDS`]
    #[must_use]
    #[instrument(skip(self), level = "trace")]
    pub fn sleep_time(&self) -> f64 {
        let Some(raw) = self.get(RULE_COMMON_SLEEP_TIME) else {
            return DEFAULT_SLEEP_SECONDS;
        };

        match raw.trim().parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds > 0.0 => {
                debug!(seconds, "sleep set");
                seconds
            }
            _ => {
                debug!(
                    value = raw,
                    "Invalid value for '{}'; using default", RULE_COMMON_SLEEP_TIME
                );
                DEFAULT_SLEEP_SECONDS
            }
        }
    }

    /// the configured attack strength, [`AttackStrength::Medium`] if unset
    ///
    /// # Errors
    ///
    /// fails if a value is present but isn't a known strength
    pub fn attack_strength(&self) -> Result<AttackStrength, BlindTimingError> {
        self.get(RULE_ATTACK_STRENGTH)
            .map_or_else(|| Ok(AttackStrength::default()), str::parse)
    }

    /// the configured alert threshold, [`AlertThreshold::Medium`] if unset
    ///
    /// # Errors
    ///
    /// fails if a value is present but isn't a known threshold
    pub fn alert_threshold(&self) -> Result<AlertThreshold, BlindTimingError> {
        self.get(RULE_ALERT_THRESHOLD)
            .map_or_else(|| Ok(AlertThreshold::default()), str::parse)
    }

    /// load a configuration from a flat JSON object
    ///
    /// string, number, and boolean values are accepted; numbers are stored in their
    /// textual form
    ///
    /// # Errors
    ///
    /// fails if `json` isn't an object of scalar values
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    #[instrument(skip_all, level = "trace")]
    pub fn from_json(json: &str) -> Result<Self, BlindTimingError> {
        let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(json)?;

        let mut config = Self::new();

        for (key, value) in parsed {
            let value = match value {
                serde_json::Value::String(string) => string,
                serde_json::Value::Number(number) => number.to_string(),
                serde_json::Value::Bool(boolean) => boolean.to_string(),
                _ => {
                    tracing::error!(%key, "rule configuration values must be scalars");

                    return Err(BlindTimingError::InvalidParameter {
                        param: key,
                        message: "rule configuration values must be strings, numbers, or booleans",
                    });
                }
            };

            config.set(key, value);
        }

        Ok(config)
    }
}

impl<K, V> FromIterator<(K, V)> for RuleConfig
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}
