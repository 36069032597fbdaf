//! Configuration types.
//!
//! Every struct has a `Default` and a `from_env()` constructor. Unset
//! variables fall back to the default; malformed ones are rejected.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::directory::UserId;
use crate::error::ConfigError;

/// Lifecycle engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on waiting for a per-request lock.
    pub lock_timeout: Duration,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
    /// Whether `reassign` is permitted on completed/cancelled requests.
    pub allow_reassign_on_terminal: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            event_capacity: 256,
            allow_reassign_on_terminal: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            lock_timeout: env_parse::<u64>("ONBOARD_LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            event_capacity: env_parse("ONBOARD_EVENT_CAPACITY")?.unwrap_or(defaults.event_capacity),
            allow_reassign_on_terminal: env_parse("ONBOARD_ALLOW_REASSIGN_TERMINAL")?
                .unwrap_or(defaults.allow_reassign_on_terminal),
        })
    }
}

/// Notification dispatch configuration.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Recipients added to every `completion` notification.
    pub hr_recipients: Vec<UserId>,
    /// Delivery attempts per intent (including the first).
    pub delivery_attempts: u32,
    /// Base backoff between delivery attempts; doubled each retry.
    pub delivery_backoff: Duration,
    /// When set, intents are appended as JSONL to this file.
    pub outbox_path: Option<PathBuf>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            hr_recipients: vec![UserId::new("hr")],
            delivery_attempts: 3,
            delivery_backoff: Duration::from_millis(200),
            outbox_path: None,
        }
    }
}

impl NotifyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let hr_recipients = match std::env::var("ONBOARD_HR_RECIPIENTS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(UserId::new)
                .collect(),
            Err(_) => defaults.hr_recipients,
        };

        let delivery_attempts: u32 =
            env_parse("ONBOARD_DELIVERY_ATTEMPTS")?.unwrap_or(defaults.delivery_attempts);
        if delivery_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_DELIVERY_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            hr_recipients,
            delivery_attempts,
            delivery_backoff: env_parse::<u64>("ONBOARD_DELIVERY_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.delivery_backoff),
            outbox_path: std::env::var("ONBOARD_OUTBOX_PATH").ok().map(PathBuf::from),
        })
    }
}

/// Dashboard cache configuration.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// A cached snapshot older than this is recomputed on the next read.
    pub max_staleness: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            max_staleness: Duration::from_secs(30),
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_staleness: env_parse::<u64>("ONBOARD_DASHBOARD_STALENESS_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(Self::default().max_staleness),
        })
    }
}

/// Process-level configuration for the `hr-onboard` binary.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub notify: NotifyConfig,
    pub dashboard: DashboardConfig,
    /// libSQL database file. In-memory store when unset.
    pub db_path: Option<PathBuf>,
    /// JSON seed of departments and templates loaded at startup.
    pub seed_path: Option<PathBuf>,
    /// Actor recorded for console commands.
    pub actor: Option<UserId>,
    /// Directory for the rolling log file.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            engine: EngineConfig::from_env()?,
            notify: NotifyConfig::from_env()?,
            dashboard: DashboardConfig::from_env()?,
            db_path: std::env::var("ONBOARD_DB_PATH").ok().map(PathBuf::from),
            seed_path: std::env::var("ONBOARD_SEED_PATH").ok().map(PathBuf::from),
            actor: std::env::var("ONBOARD_ACTOR").ok().map(UserId::new),
            log_dir: std::env::var("ONBOARD_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let engine = EngineConfig::default();
        assert_eq!(engine.lock_timeout, Duration::from_secs(2));
        assert!(!engine.allow_reassign_on_terminal);

        let notify = NotifyConfig::default();
        assert_eq!(notify.hr_recipients, vec![UserId::new("hr")]);
        assert_eq!(notify.delivery_attempts, 3);
        assert!(notify.outbox_path.is_none());
    }

    #[test]
    fn parse_value_accepts_numbers_and_bools() {
        assert_eq!(parse_value::<u64>("K", " 42 ").unwrap(), 42);
        assert!(parse_value::<bool>("K", "true").unwrap());
    }

    #[test]
    fn parse_value_rejects_garbage() {
        let err = parse_value::<u64>("ONBOARD_LOCK_TIMEOUT_MS", "soon").unwrap_err();
        match err {
            ConfigError::InvalidValue { key, message } => {
                assert_eq!(key, "ONBOARD_LOCK_TIMEOUT_MS");
                assert!(message.contains("soon"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
