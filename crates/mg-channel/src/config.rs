//! Channel configuration: backend base path, error-streak lockout, timeouts.

use std::path::Path;

use chrono::Duration;
use mg_core::config::{check_duration_ms, parse_env, ConfigError};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "/api";
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;
pub const DEFAULT_LOCKOUT_MS: i64 = 300_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Prefix for every backend route (`/csrf-token`, `/auth/refresh`, ...).
    pub base_url: String,
    /// Consecutive failed requests before the lockout engages.
    pub max_consecutive_errors: u32,
    pub lockout_ms: i64,
    pub request_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            lockout_ms: DEFAULT_LOCKOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ChannelConfig {
    /// Load defaults, overlay `path` if given, then apply `MG_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Read the `channel` section of a shared config file. A file without one
    /// yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Wrapper {
            channel: ChannelConfig,
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let wrapper: Wrapper = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        wrapper.channel.validate()?;
        debug!(path = %path.display(), base_url = %wrapper.channel.base_url, "Loaded channel config");
        Ok(wrapper.channel)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_duration_ms("channel.lockout_ms", self.lockout_ms)?;
        check_duration_ms(
            "channel.request_timeout_ms",
            i64::try_from(self.request_timeout_ms).unwrap_or(i64::MAX),
        )
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("MG_API_BASE") {
            self.base_url = base.trim().to_string();
        }
        if let Some(v) = parse_env::<u32, _>(&lookup, "MG_MAX_ERRORS")? {
            self.max_consecutive_errors = v;
        }
        if let Some(v) = parse_env::<i64, _>(&lookup, "MG_LOCKOUT_MS")? {
            self.lockout_ms = v;
        }
        if let Some(v) = parse_env::<u64, _>(&lookup, "MG_REQUEST_TIMEOUT_MS")? {
            self.request_timeout_ms = v;
        }
        self.validate()
    }

    pub fn lockout(&self) -> Duration {
        Duration::milliseconds(self.lockout_ms)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }

    /// Join the base URL and a route, tolerating slashes on either side.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.base_url, "/api");
        assert_eq!(config.max_consecutive_errors, 3);
        assert_eq!(config.lockout(), Duration::minutes(5));
    }

    #[test]
    fn test_endpoint_join() {
        let mut config = ChannelConfig::default();
        assert_eq!(config.endpoint("/csrf-token"), "/api/csrf-token");
        config.base_url = "https://mall.example/api/".into();
        assert_eq!(config.endpoint("auth/refresh"), "https://mall.example/api/auth/refresh");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ChannelConfig::default();
        config
            .apply_env(|k| match k {
                "MG_API_BASE" => Some(" https://mall.example/api ".into()),
                "MG_MAX_ERRORS" => Some("5".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.base_url, "https://mall.example/api");
        assert_eq!(config.max_consecutive_errors, 5);

        assert!(config
            .apply_env(|k| (k == "MG_LOCKOUT_MS").then(|| "forever".to_string()))
            .is_err());
    }

    #[test]
    fn test_lockout_upper_bound() {
        let mut config = ChannelConfig::default();
        assert!(matches!(
            config.apply_env(|k| (k == "MG_LOCKOUT_MS").then(|| i64::MAX.to_string())),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(config
            .apply_env(|k| (k == "MG_REQUEST_TIMEOUT_MS").then(|| u64::MAX.to_string()))
            .is_err());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mall-guard.json");
        std::fs::write(&path, r#"{"channel": {"lockout_ms": 9223372036854775807}}"#).unwrap();
        assert!(ChannelConfig::from_file(&path).is_err());
        std::fs::write(&path, r#"{"channel": {"lockout_ms": -1}}"#).unwrap();
        assert!(ChannelConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_channel_section_of_shared_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mall-guard.json");
        std::fs::write(&path, r#"{"min_fill_ms": 2000, "channel": {"lockout_ms": 60000}}"#).unwrap();
        let config = ChannelConfig::from_file(&path).unwrap();
        assert_eq!(config.lockout_ms, 60_000);
        assert_eq!(config.base_url, "/api");

        std::fs::write(&path, r#"{"min_fill_ms": 2000}"#).unwrap();
        assert_eq!(ChannelConfig::from_file(&path).unwrap(), ChannelConfig::default());
    }
}
