//! Runtime configuration.
//!
//! Settings come from JSON or from `ENGINE_*` environment variables and fall
//! back to [`RuntimeConfig::default`] for anything left unset.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable for [`RuntimeConfig::worker_threads`].
pub const WORKER_THREADS_ENV: &str = "ENGINE_WORKER_THREADS";
/// Environment variable for [`RuntimeConfig::cycle_rate`].
pub const CYCLE_RATE_ENV: &str = "ENGINE_CYCLE_RATE";
/// Environment variable for [`RuntimeConfig::max_cycles`].
pub const MAX_CYCLES_ENV: &str = "ENGINE_MAX_CYCLES";

/// Configuration for the runtime and its host loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads (0 = one per logical CPU).
    pub worker_threads: usize,
    /// Target cycles per second for [`Runtime::run`](crate::Runtime::run).
    /// Zero or less runs cycles back to back.
    pub cycle_rate: f64,
    /// Maximum number of cycles [`Runtime::run`](crate::Runtime::run)
    /// executes (0 = unlimited).
    pub max_cycles: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            cycle_rate: 60.0,
            max_cycles: 0,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::Json(err.to_string()))
    }

    /// Read the `ENGINE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] if a variable is set but does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] if a value does not parse.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            worker_threads: parse_setting(&lookup, WORKER_THREADS_ENV)?
                .unwrap_or(defaults.worker_threads),
            cycle_rate: parse_setting(&lookup, CYCLE_RATE_ENV)?.unwrap_or(defaults.cycle_rate),
            max_cycles: parse_setting(&lookup, MAX_CYCLES_ENV)?.unwrap_or(defaults.max_cycles),
        })
    }

    /// Target duration of one cycle, or `None` if cycles are unpaced.
    #[must_use]
    pub fn cycle_duration(&self) -> Option<Duration> {
        (self.cycle_rate.is_finite() && self.cycle_rate > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / self.cycle_rate))
    }
}

fn parse_setting<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidSetting {
            key: key.to_string(),
            value,
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.max_cycles, 0);
        assert_eq!(config.cycle_duration(), Some(Duration::from_secs_f64(1.0 / 60.0)));
    }

    #[test]
    fn test_from_json_partial() {
        let config = RuntimeConfig::from_json(r#"{ "worker_threads": 4 }"#).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.max_cycles, 0);

        assert!(matches!(
            RuntimeConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_from_env_with() {
        let config = RuntimeConfig::from_env_with(lookup(&[
            (WORKER_THREADS_ENV, "2"),
            (MAX_CYCLES_ENV, " 10 "),
        ]))
        .unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.max_cycles, 10);
        assert_eq!(config.cycle_rate, 60.0);
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        let err = RuntimeConfig::from_env_with(lookup(&[(CYCLE_RATE_ENV, "fast")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidSetting {
                key: CYCLE_RATE_ENV.to_string(),
                value: "fast".to_string(),
            }
        );
    }

    #[test]
    fn test_unpaced_cycle_rate() {
        let config = RuntimeConfig {
            cycle_rate: 0.0,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.cycle_duration(), None);
    }
}
