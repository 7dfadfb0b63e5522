//! Configuration loading for the triage engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `TRIAGE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "TRIAGE_";

/// Application configuration derived from `TRIAGE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,
    #[serde(default = "default_tracker_timeout_seconds")]
    pub tracker_timeout_seconds: u64,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Time windows of the issue lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LifecycleConfig {
    /// A closed issue is reopened if its error recurs within this many days.
    ///
    /// Environment variable: `TRIAGE_REOPEN_WINDOW_DAYS`
    #[serde(default = "default_reopen_window_days")]
    pub reopen_window_days: u32,

    /// Open issues whose error has been quiet this long are closed by the sweep.
    ///
    /// Environment variable: `TRIAGE_STALE_DAYS`
    #[serde(default = "default_stale_days")]
    pub stale_days: u32,

    /// Minimum gap between occurrence comments on the same issue.
    ///
    /// Environment variable: `TRIAGE_COMMENT_COOLDOWN_MINUTES`
    #[serde(default = "default_comment_cooldown_minutes")]
    pub comment_cooldown_minutes: u32,

    /// Look-back for grouping new errors into a recent open issue.
    ///
    /// Environment variable: `TRIAGE_NOISE_GUARD_HOURS`
    #[serde(default = "default_noise_guard_hours")]
    pub noise_guard_hours: u32,
}

/// Background orchestration queue parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_dispatch_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_dispatch_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_dispatch_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_dispatch_retry_max_ms")]
    pub retry_max_ms: u64,
}

/// Periodic sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_seconds")]
    pub interval_seconds: u64,
    /// Maximum records examined per project and sweep kind in one pass.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            github_api_base: default_github_api_base(),
            tracker_timeout_seconds: default_tracker_timeout_seconds(),
            lifecycle: LifecycleConfig::default(),
            dispatch: DispatchConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reopen_window_days: default_reopen_window_days(),
            stale_days: default_stale_days(),
            comment_cooldown_minutes: default_comment_cooldown_minutes(),
            noise_guard_hours: default_noise_guard_hours(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_dispatch_queue_capacity(),
            concurrency: default_dispatch_concurrency(),
            max_attempts: default_dispatch_max_attempts(),
            retry_base_ms: default_dispatch_retry_base_ms(),
            retry_max_ms: default_dispatch_retry_max_ms(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_sweep_interval_seconds(),
            batch_size: default_sweep_batch_size(),
        }
    }
}

impl AppConfig {
    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_seconds)
    }

    /// Returns a redacted JSON representation (credentials in the database URL are masked).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_url_password(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections {
                value: self.db_max_connections,
            });
        }

        if let Err(source) = url::Url::parse(&self.github_api_base) {
            return Err(ConfigError::InvalidGitHubApiBase {
                value: self.github_api_base.clone(),
                source,
            });
        }

        if self.tracker_timeout_seconds == 0 || self.tracker_timeout_seconds > 300 {
            return Err(ConfigError::InvalidTrackerTimeout {
                value: self.tracker_timeout_seconds,
            });
        }

        self.lifecycle.validate()?;
        self.dispatch.validate()?;
        self.sweep.validate()?;

        Ok(())
    }
}

impl LifecycleConfig {
    /// Every window must be positive; a zero window would disable its rule silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = [
            ("REOPEN_WINDOW_DAYS", self.reopen_window_days),
            ("STALE_DAYS", self.stale_days),
            ("COMMENT_COOLDOWN_MINUTES", self.comment_cooldown_minutes),
            ("NOISE_GUARD_HOURS", self.noise_guard_hours),
        ];
        for (field, value) in windows {
            if value == 0 {
                return Err(ConfigError::InvalidLifecycleWindow { field, value });
            }
        }
        Ok(())
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidDispatchQueueCapacity {
                value: self.queue_capacity,
            });
        }

        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidDispatchConcurrency {
                value: self.concurrency,
            });
        }

        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::InvalidDispatchMaxAttempts {
                value: self.max_attempts,
            });
        }

        if self.retry_base_ms > self.retry_max_ms {
            return Err(ConfigError::InvalidDispatchRetryBounds {
                base: self.retry_base_ms,
                max: self.retry_max_ms,
            });
        }

        Ok(())
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds < 60 || self.interval_seconds > 86_400 {
            return Err(ConfigError::InvalidSweepInterval {
                value: self.interval_seconds,
            });
        }

        if self.batch_size == 0 || self.batch_size > 10_000 {
            return Err(ConfigError::InvalidSweepBatchSize {
                value: self.batch_size,
            });
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://triage.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_github_api_base() -> String {
    crate::tracker::github::DEFAULT_API_BASE.to_string()
}

fn default_tracker_timeout_seconds() -> u64 {
    10
}

fn default_reopen_window_days() -> u32 {
    7
}

fn default_stale_days() -> u32 {
    7
}

fn default_comment_cooldown_minutes() -> u32 {
    60
}

fn default_noise_guard_hours() -> u32 {
    24
}

fn default_dispatch_queue_capacity() -> usize {
    1024
}

fn default_dispatch_concurrency() -> usize {
    8
}

fn default_dispatch_max_attempts() -> u32 {
    3
}

fn default_dispatch_retry_base_ms() -> u64 {
    500
}

fn default_dispatch_retry_max_ms() -> u64 {
    30_000
}

fn default_sweep_interval_seconds() -> u64 {
    3600
}

fn default_sweep_batch_size() -> u64 {
    500
}

fn redact_url_password(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("REDACTED")).is_ok() {
                parsed.to_string()
            } else {
                "[REDACTED]".to_string()
            }
        }
        _ => raw.to_string(),
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for TRIAGE_{key}")]
    InvalidValue { key: String, value: String },
    #[error("database URL is missing; set TRIAGE_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be at least 1, got {value}")]
    InvalidDbMaxConnections { value: u32 },
    #[error("invalid GitHub API base '{value}': {source}")]
    InvalidGitHubApiBase {
        value: String,
        source: url::ParseError,
    },
    #[error("tracker timeout must be between 1 and 300 seconds, got {value}")]
    InvalidTrackerTimeout { value: u64 },
    #[error("lifecycle window TRIAGE_{field} must be positive, got {value}")]
    InvalidLifecycleWindow { field: &'static str, value: u32 },
    #[error("dispatch queue capacity must be at least 1, got {value}")]
    InvalidDispatchQueueCapacity { value: usize },
    #[error("dispatch concurrency must be between 1 and 64, got {value}")]
    InvalidDispatchConcurrency { value: usize },
    #[error("dispatch max attempts must be between 1 and 10, got {value}")]
    InvalidDispatchMaxAttempts { value: u32 },
    #[error("dispatch retry base ({base}ms) cannot be greater than retry max ({max}ms)")]
    InvalidDispatchRetryBounds { base: u64, max: u64 },
    #[error("sweep interval must be between 60 and 86400 seconds, got {value}")]
    InvalidSweepInterval { value: u64 },
    #[error("sweep batch size must be between 1 and 10000, got {value}")]
    InvalidSweepBatchSize { value: u64 },
}

/// Loads configuration using layered `.env` files and `TRIAGE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections =
            take_parsed(&mut layered, "DB_MAX_CONNECTIONS", default_db_max_connections)?;
        let db_acquire_timeout_ms =
            take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS", default_db_acquire_timeout_ms)?;
        let github_api_base = take_string(&mut layered, "GITHUB_API_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(default_github_api_base);
        let tracker_timeout_seconds = take_parsed(
            &mut layered,
            "TRACKER_TIMEOUT_SECONDS",
            default_tracker_timeout_seconds,
        )?;

        let lifecycle = LifecycleConfig {
            reopen_window_days: take_parsed(
                &mut layered,
                "REOPEN_WINDOW_DAYS",
                default_reopen_window_days,
            )?,
            stale_days: take_parsed(&mut layered, "STALE_DAYS", default_stale_days)?,
            comment_cooldown_minutes: take_parsed(
                &mut layered,
                "COMMENT_COOLDOWN_MINUTES",
                default_comment_cooldown_minutes,
            )?,
            noise_guard_hours: take_parsed(
                &mut layered,
                "NOISE_GUARD_HOURS",
                default_noise_guard_hours,
            )?,
        };

        let dispatch = DispatchConfig {
            queue_capacity: take_parsed(
                &mut layered,
                "DISPATCH_QUEUE_CAPACITY",
                default_dispatch_queue_capacity,
            )?,
            concurrency: take_parsed(
                &mut layered,
                "DISPATCH_CONCURRENCY",
                default_dispatch_concurrency,
            )?,
            max_attempts: take_parsed(
                &mut layered,
                "DISPATCH_MAX_ATTEMPTS",
                default_dispatch_max_attempts,
            )?,
            retry_base_ms: take_parsed(
                &mut layered,
                "DISPATCH_RETRY_BASE_MS",
                default_dispatch_retry_base_ms,
            )?,
            retry_max_ms: take_parsed(
                &mut layered,
                "DISPATCH_RETRY_MAX_MS",
                default_dispatch_retry_max_ms,
            )?,
        };

        let sweep = SweepConfig {
            interval_seconds: take_parsed(
                &mut layered,
                "SWEEP_INTERVAL_SECONDS",
                default_sweep_interval_seconds,
            )?,
            batch_size: take_parsed(&mut layered, "SWEEP_BATCH_SIZE", default_sweep_batch_size)?,
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            github_api_base,
            tracker_timeout_seconds,
            lifecycle,
            dispatch,
            sweep,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Empty values fall back to the default; unparsable values are rejected.
fn take_parsed<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> T,
) -> Result<T, ConfigError> {
    match take_string(layered, key) {
        None => Ok(default()),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lifecycle.reopen_window_days, 7);
        assert_eq!(config.lifecycle.comment_cooldown_minutes, 60);
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert_eq!(config.sweep.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn lifecycle_windows_must_be_positive() {
        let config = LifecycleConfig {
            stale_days: 0,
            ..LifecycleConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLifecycleWindow {
                field: "STALE_DAYS",
                value: 0
            })
        ));
    }

    #[test]
    fn dispatch_validation() {
        let inverted = DispatchConfig {
            retry_base_ms: 5000,
            retry_max_ms: 100,
            ..DispatchConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidDispatchRetryBounds { .. })
        ));

        let no_workers = DispatchConfig {
            concurrency: 0,
            ..DispatchConfig::default()
        };
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn sweep_validation() {
        let too_fast = SweepConfig {
            interval_seconds: 5,
            ..SweepConfig::default()
        };
        assert!(too_fast.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_format() {
        let config = AppConfig {
            log_format: "xml".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogFormat { .. })
        ));
    }

    #[test]
    fn redacts_database_password() {
        let config = AppConfig {
            database_url: "postgres://triage:hunter2@db:5432/triage".to_string(),
            ..AppConfig::default()
        };
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("triage:REDACTED@db"));
    }
}
