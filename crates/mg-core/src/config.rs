//! Guard configuration: defaults, optional JSON file, environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::security::rate_limit::RateLimitConfig;

/// Minimum time between form load and submit, in milliseconds.
pub const DEFAULT_MIN_FILL_MS: i64 = 3_000;

/// Longest accepted duration setting (30 days).
pub const MAX_DURATION_MS: i64 = 30 * 24 * 60 * 60 * 1_000;

/// Decoy field names a human never fills in.
pub const DEFAULT_HONEYPOT_NAMES: &[&str] = &["website", "url", "fax"];

/// CSS class that marks any field as a decoy.
pub const DEFAULT_HONEYPOT_CLASS: &str = "hp-field";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
    #[error("{field} must be between 0 and {max} ms, got {value}")]
    OutOfRange { field: String, value: i64, max: i64 },
}

/// Settings for [`crate::AbuseGuard`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub rate_limit: RateLimitConfig,
    pub min_fill_ms: i64,
    pub honeypot_names: Vec<String>,
    pub honeypot_class: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            min_fill_ms: DEFAULT_MIN_FILL_MS,
            honeypot_names: DEFAULT_HONEYPOT_NAMES.iter().map(|s| s.to_string()).collect(),
            honeypot_class: DEFAULT_HONEYPOT_CLASS.to_string(),
        }
    }
}

impl GuardConfig {
    /// Load defaults, overlay `path` if given, then apply `MG_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded guard config");
        Ok(config)
    }

    /// Reject durations that are negative or longer than [`MAX_DURATION_MS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_duration_ms("rate_limit.window_ms", self.rate_limit.window_ms)?;
        check_duration_ms("rate_limit.block_duration_ms", self.rate_limit.block_duration_ms)?;
        check_duration_ms("min_fill_ms", self.min_fill_ms)
    }

    /// Apply overrides from a variable lookup. Split out so tests don't touch
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env::<u32, _>(&lookup, "MG_RATE_MAX_ATTEMPTS")? {
            self.rate_limit.max_attempts = v;
        }
        if let Some(v) = parse_env::<i64, _>(&lookup, "MG_RATE_WINDOW_MS")? {
            self.rate_limit.window_ms = v;
        }
        if let Some(v) = parse_env::<i64, _>(&lookup, "MG_RATE_BLOCK_MS")? {
            self.rate_limit.block_duration_ms = v;
        }
        if let Some(v) = parse_env::<i64, _>(&lookup, "MG_MIN_FILL_MS")? {
            self.min_fill_ms = v;
        }
        self.validate()
    }
}

/// Read and parse one override. Negative durations are rejected.
pub fn parse_env<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v >= T::default() => Ok(Some(v)),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw,
        }),
    }
}

pub fn check_duration_ms(field: &str, value: i64) -> Result<(), ConfigError> {
    if (0..=MAX_DURATION_MS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            max: MAX_DURATION_MS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.rate_limit.max_attempts, 3);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.rate_limit.block_duration_ms, 300_000);
        assert_eq!(config.min_fill_ms, 3_000);
        assert_eq!(config.honeypot_names, vec!["website", "url", "fax"]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guard.json");
        std::fs::write(&path, r#"{"min_fill_ms": 5000, "rate_limit": {"max_attempts": 5}}"#).unwrap();
        let config = GuardConfig::from_file(&path).unwrap();
        assert_eq!(config.min_fill_ms, 5000);
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.honeypot_class, DEFAULT_HONEYPOT_CLASS);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GuardConfig::default();
        config
            .apply_env(env(&[("MG_RATE_MAX_ATTEMPTS", "10"), ("MG_MIN_FILL_MS", " 1500 ")]))
            .unwrap();
        assert_eq!(config.rate_limit.max_attempts, 10);
        assert_eq!(config.min_fill_ms, 1500);
    }

    #[test]
    fn test_invalid_env_rejected() {
        let mut config = GuardConfig::default();
        assert!(matches!(
            config.apply_env(env(&[("MG_RATE_WINDOW_MS", "soon")])),
            Err(ConfigError::InvalidEnv { .. })
        ));
        assert!(config.apply_env(env(&[("MG_RATE_BLOCK_MS", "-1")])).is_err());
    }

    #[test]
    fn test_env_duration_upper_bound() {
        let mut config = GuardConfig::default();
        assert!(matches!(
            config.apply_env(env(&[("MG_RATE_BLOCK_MS", "9223372036854775807")])),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(config
            .apply_env(env(&[("MG_MIN_FILL_MS", (MAX_DURATION_MS + 1).to_string().as_str())]))
            .is_err());

        let mut config = GuardConfig::default();
        config
            .apply_env(env(&[("MG_RATE_BLOCK_MS", MAX_DURATION_MS.to_string().as_str())]))
            .unwrap();
        assert_eq!(config.rate_limit.block_duration_ms, MAX_DURATION_MS);
    }

    #[test]
    fn test_file_durations_validated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guard.json");

        std::fs::write(&path, r#"{"rate_limit": {"block_duration_ms": 9223372036854775807}}"#).unwrap();
        assert!(matches!(
            GuardConfig::from_file(&path),
            Err(ConfigError::OutOfRange { ref field, .. }) if field == "rate_limit.block_duration_ms"
        ));

        std::fs::write(&path, r#"{"rate_limit": {"window_ms": -5}}"#).unwrap();
        assert!(GuardConfig::from_file(&path).is_err());

        std::fs::write(&path, r#"{"min_fill_ms": -1}"#).unwrap();
        assert!(GuardConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            GuardConfig::from_file(Path::new("/nonexistent/guard.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
