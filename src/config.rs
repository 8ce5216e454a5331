//! Verifier Configuration
//!
//! One `VerifierConfig` is scoped to an orchestrator; there is no process-wide
//! configuration state. Values come from defaults, an optional JSON file and
//! `SQL_VERIFY_*` environment variables, in that order.

use crate::error::{Result, VerifierError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "SQL_VERIFY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Whether the repair loop runs at all
    pub auto_fix: bool,

    /// Upper bound on repair attempts per session
    pub max_repair_attempts: u32,

    /// Hard wall-clock budget for a single statement execution
    pub execution_timeout_ms: u64,

    /// Row count above which the result is flagged as excessive
    pub large_result_threshold: usize,

    /// Latency above which the execution is flagged as slow
    pub slow_query_threshold_ms: u64,

    /// Minimum hint confidence (0.0-1.0) the repair engine acts on
    pub repair_confidence_threshold: f64,

    /// Maximum edit distance for nearest-name suggestions
    pub max_suggestion_distance: usize,

    /// Only plan the statement during execution instead of running it
    pub dry_run: bool,

    /// Number of result rows kept in the execution artifacts
    pub sample_rows: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            auto_fix: true,
            max_repair_attempts: 3,
            execution_timeout_ms: 5_000,
            large_result_threshold: 10_000,
            slow_query_threshold_ms: 1_000,
            repair_confidence_threshold: 0.75,
            max_suggestion_distance: 2,
            dry_run: false,
            sample_rows: 5,
        }
    }
}

impl VerifierConfig {
    /// Load a config from a JSON file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SQL_VERIFY_*` environment variables
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_vars(std::env::vars())?;
        self.validate()?;
        Ok(self)
    }

    fn apply_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            debug!("Config override from environment: {}={}", key, value);
            match name {
                "AUTO_FIX" => self.auto_fix = parse_var(&key, &value)?,
                "MAX_REPAIR_ATTEMPTS" => self.max_repair_attempts = parse_var(&key, &value)?,
                "EXECUTION_TIMEOUT_MS" => self.execution_timeout_ms = parse_var(&key, &value)?,
                "LARGE_RESULT_THRESHOLD" => self.large_result_threshold = parse_var(&key, &value)?,
                "SLOW_QUERY_THRESHOLD_MS" => self.slow_query_threshold_ms = parse_var(&key, &value)?,
                "REPAIR_CONFIDENCE_THRESHOLD" => {
                    self.repair_confidence_threshold = parse_var(&key, &value)?
                }
                "MAX_SUGGESTION_DISTANCE" => self.max_suggestion_distance = parse_var(&key, &value)?,
                "DRY_RUN" => self.dry_run = parse_var(&key, &value)?,
                "SAMPLE_ROWS" => self.sample_rows = parse_var(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution_timeout_ms == 0 {
            return Err(VerifierError::Config(
                "execution_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.repair_confidence_threshold) {
            return Err(VerifierError::Config(format!(
                "repair_confidence_threshold must be within [0, 1], got {}",
                self.repair_confidence_threshold
            )));
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VerifierError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert!(config.auto_fix);
        assert_eq!(config.max_repair_attempts, 3);
        assert_eq!(config.execution_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: VerifierConfig =
            serde_json::from_str(r#"{"max_repair_attempts": 1, "dry_run": true}"#).unwrap();
        assert_eq!(config.max_repair_attempts, 1);
        assert!(config.dry_run);
        assert_eq!(config.large_result_threshold, 10_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = VerifierConfig::default();
        config
            .apply_vars(vars(&[
                ("SQL_VERIFY_AUTO_FIX", "false"),
                ("SQL_VERIFY_EXECUTION_TIMEOUT_MS", "250"),
                ("UNRELATED", "x"),
            ]))
            .unwrap();
        assert!(!config.auto_fix);
        assert_eq!(config.execution_timeout_ms, 250);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = VerifierConfig::default();
        let err = config
            .apply_vars(vars(&[("SQL_VERIFY_MAX_REPAIR_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, VerifierError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = VerifierConfig {
            repair_confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VerifierConfig {
            execution_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
