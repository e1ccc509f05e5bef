//! Configuration types for the cache, scheduler, and upstream source.

use crate::error::PulseError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the pulse daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Snapshot cache settings.
    pub cache: CacheConfig,
    /// Task runner settings.
    pub scheduler: SchedulerConfig,
    /// Upstream data source settings.
    pub source: SourceConfig,
}

/// Snapshot cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a stored snapshot is served as fresh.
    pub ttl_secs: u64,
    /// Multiple of the TTL after which an in-flight refresh is treated as
    /// stuck and force-cleared.
    pub stuck_multiplier: u32,
    /// Milliseconds between polls while waiting for another caller's refresh
    /// to complete.
    pub poll_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            stuck_multiplier: 2,
            poll_interval_ms: 100,
        }
    }
}

impl CacheConfig {
    /// Snapshot validity window as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Completion poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Task runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between refresh-task dispatches.
    pub refresh_interval_secs: u64,
    /// Milliseconds the runner idles when no task is due.
    pub idle_wait_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            idle_wait_ms: 100,
        }
    }
}

impl SchedulerConfig {
    /// Idle wait between due-checks as a [`Duration`].
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// Upstream source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// URL the HTTP fetcher pulls snapshots from.
    pub url: String,
    /// Bearer token presented to the source. Empty means unauthenticated.
    pub access_token: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl PulseConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(PulseError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        toml::from_str(&raw)
            .map_err(|e| PulseError::Config(format!("invalid config {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PulseConfig::default();
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.stuck_multiplier, 2);
        assert_eq!(config.cache.poll_interval_ms, 100);
        assert_eq!(config.scheduler.refresh_interval_secs, 300);
        assert_eq!(config.scheduler.idle_wait_ms, 100);
        assert!(config.source.url.is_empty());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PulseConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: PulseConfig = toml::from_str(
            r#"
            [cache]
            ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.stuck_multiplier, 2);
        assert_eq!(config.scheduler.refresh_interval_secs, 300);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulse.toml");

        let mut config = PulseConfig::default();
        config.cache.ttl_secs = 120;
        config.source.url = "https://api.example.com/metrics".to_owned();
        config.source.request_timeout_secs = 10;

        let raw = toml::to_string(&config).unwrap();
        std::fs::write(&path, raw).unwrap();

        let restored = PulseConfig::load(&path).unwrap();
        assert_eq!(restored.cache.ttl_secs, 120);
        assert_eq!(restored.source.url, "https://api.example.com/metrics");
        assert_eq!(restored.source.request_timeout_secs, 10);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulse.toml");
        std::fs::write(&path, "cache = \"not a table\"").unwrap();

        let err = PulseConfig::load(&path).unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
    }

    #[test]
    fn duration_helpers() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl(), Duration::from_secs(300));
        assert_eq!(cache.poll_interval(), Duration::from_millis(100));
        assert_eq!(
            SchedulerConfig::default().idle_wait(),
            Duration::from_millis(100)
        );
    }
}
