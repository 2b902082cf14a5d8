use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::{ReminderMode, SchedulerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub dispatch_enabled: bool,
    pub dispatch_port: u16,
    pub backend_servers: Vec<String>,
    pub max_connections: usize,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_evict_interval_secs: u64,
    pub reminder_tick_ms: u64,
    pub reminder_queue_capacity: usize,
    pub notification_buffer: usize,
    pub reminder_mode: ReminderMode,
    pub database_url: Option<String>,
    pub upload_dir: PathBuf,
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            dispatch_enabled: true,
            dispatch_port: 8085,
            backend_servers: vec![
                "localhost:8080".to_string(),
                "localhost:8081".to_string(),
                "localhost:8082".to_string(),
            ],
            max_connections: 150,
            rate_limit_per_second: 1,
            rate_limit_burst: 5,
            rate_limit_evict_interval_secs: 60,
            reminder_tick_ms: 1000,
            reminder_queue_capacity: 64,
            notification_buffer: 128,
            reminder_mode: ReminderMode::Once,
            database_url: None,
            upload_dir: PathBuf::from("./uploads/images"),
            shutdown_timeout_secs: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unset keys fall back to
    /// the defaults; set but malformed keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let backend_servers = match lookup("BACKEND_SERVERS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.backend_servers,
        };

        let reminder_mode = match lookup("REMINDER_MODE") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "REMINDER_MODE",
                value: raw,
            })?,
            None => defaults.reminder_mode,
        };

        Ok(Config {
            server_host: lookup("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_or(&lookup, "SERVER_PORT", defaults.server_port)?,
            dispatch_enabled: parse_or(&lookup, "DISPATCH_ENABLED", defaults.dispatch_enabled)?,
            dispatch_port: parse_or(&lookup, "DISPATCH_PORT", defaults.dispatch_port)?,
            backend_servers,
            max_connections: positive_or(&lookup, "MAX_CONNECTIONS", defaults.max_connections)?,
            rate_limit_per_second: positive_or(
                &lookup,
                "RATE_LIMIT_PER_SECOND",
                defaults.rate_limit_per_second,
            )?,
            rate_limit_burst: positive_or(&lookup, "RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_evict_interval_secs: positive_or(
                &lookup,
                "RATE_LIMIT_EVICT_INTERVAL_SECS",
                defaults.rate_limit_evict_interval_secs,
            )?,
            reminder_tick_ms: positive_or(&lookup, "REMINDER_TICK_MS", defaults.reminder_tick_ms)?,
            reminder_queue_capacity: positive_or(
                &lookup,
                "REMINDER_QUEUE_CAPACITY",
                defaults.reminder_queue_capacity,
            )?,
            notification_buffer: positive_or(
                &lookup,
                "NOTIFICATION_BUFFER",
                defaults.notification_buffer,
            )?,
            reminder_mode,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            upload_dir: lookup("UPLOAD_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            shutdown_timeout_secs: parse_or(
                &lookup,
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout_secs,
            )?,
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: Duration::from_millis(self.reminder_tick_ms),
            queue_capacity: self.reminder_queue_capacity,
            notification_buffer: self.notification_buffer,
            mode: self.reminder_mode,
        }
    }

    pub fn rate_limit_evict_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_evict_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn positive_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.max_connections, 150);
        assert_eq!(config.rate_limit_per_second, 1);
        assert_eq!(config.rate_limit_burst, 5);
        assert_eq!(config.backend_servers.len(), 3);
        assert_eq!(config.reminder_mode, ReminderMode::Once);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn backend_list_is_split_and_trimmed() {
        let config = Config::from_lookup(lookup_from(&[(
            "BACKEND_SERVERS",
            " 10.0.0.1:80 ,10.0.0.2:80,, ",
        )]))
        .unwrap();
        assert_eq!(config.backend_servers, vec!["10.0.0.1:80", "10.0.0.2:80"]);
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SERVER_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SERVER_PORT", .. }));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("MAX_CONNECTIONS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn rejected_zero_reports_the_raw_value() {
        let err = Config::from_lookup(lookup_from(&[("RATE_LIMIT_BURST", " 00")])).unwrap_err();
        match err {
            ConfigError::Invalid { key, value } => {
                assert_eq!(key, "RATE_LIMIT_BURST");
                assert_eq!(value, " 00");
            }
        }
    }

    #[test]
    fn upload_dir_defaults_and_overrides() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("./uploads/images"));

        let config = Config::from_lookup(lookup_from(&[("UPLOAD_DIR", "/var/todo/images")])).unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("/var/todo/images"));
    }

    #[test]
    fn repeat_mode_and_database_url_are_read() {
        let config = Config::from_lookup(lookup_from(&[
            ("REMINDER_MODE", "repeat"),
            ("DATABASE_URL", "postgres://localhost/todos"),
            ("REMINDER_TICK_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.reminder_mode, ReminderMode::Repeat);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/todos"));
        assert_eq!(config.scheduler().tick, Duration::from_millis(250));
    }
}
