use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct PatrolConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default = "default_feed_timeout")]
    pub timeout_seconds: u64,
}

fn default_feed_timeout() -> u64 {
    30
}

/// Poll loop tuning. Thresholds are policy, not invariants, so they live here.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_seconds: u64,
    pub retry_backoff_seconds: u64,
    pub checkpoint_interval_seconds: u64,
    /// Flag sessions with no active sighting for this long. `None` disables the check.
    pub stale_after_minutes: Option<u64>,
    pub restore_attempts: usize,
    pub min_speed: f64,
    pub min_altitude: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            retry_backoff_seconds: 10,
            checkpoint_interval_seconds: 300,
            stale_after_minutes: None,
            restore_attempts: 3,
            min_speed: 5.0,
            min_altitude: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8770,
        }
    }
}

impl PatrolConfig {
    /// Load from a TOML file, with `PATROL__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("PATROL").separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.monitor.validate()?;
        Ok(config)
    }
}

/// Upper bound for the poll, backoff and checkpoint intervals (one week).
pub const MAX_INTERVAL_SECONDS: u64 = 7 * 24 * 60 * 60;
/// Upper bound for `stale_after_minutes` (thirty days).
pub const MAX_STALE_MINUTES: u64 = 30 * 24 * 60;

impl MonitorConfig {
    /// Every interval must be non-zero and bounded; thresholds must be finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "monitor.poll_interval_seconds",
            self.poll_interval_seconds,
            MAX_INTERVAL_SECONDS,
        )?;
        check_range(
            "monitor.retry_backoff_seconds",
            self.retry_backoff_seconds,
            MAX_INTERVAL_SECONDS,
        )?;
        check_range(
            "monitor.checkpoint_interval_seconds",
            self.checkpoint_interval_seconds,
            MAX_INTERVAL_SECONDS,
        )?;
        if let Some(minutes) = self.stale_after_minutes {
            check_range("monitor.stale_after_minutes", minutes, MAX_STALE_MINUTES)?;
        }
        if self.restore_attempts == 0 {
            return Err(ConfigError::Message(
                "monitor.restore_attempts must be at least 1".to_string(),
            ));
        }
        for (key, value) in [
            ("monitor.min_speed", self.min_speed),
            ("monitor.min_altitude", self.min_altitude),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Message(format!(
                    "{} must be a finite, non-negative number (got {})",
                    key, value
                )));
            }
        }
        Ok(())
    }
}

fn check_range(key: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::Message(format!(
            "{} must be between 1 and {} (got {})",
            key, max, value
        )));
    }
    Ok(())
}
