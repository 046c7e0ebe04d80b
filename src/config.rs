//! Configuration module for pollwatch.
//!
//! Server settings come from environment variables. Poller options (status
//! thresholds, verbosity, interval) are looked up by name in one or more
//! [`OptionSource`]s, typically the environment layered over the database
//! settings table.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::status::{LogVerbosity, TrackerConfig};

/// Option names understood by the poller.
pub mod options {
    pub const PING_FAILURE_COUNT: &str = "ping_failure_count";
    pub const PING_RECOVERY_COUNT: &str = "ping_recovery_count";
    pub const LOG_VERBOSITY: &str = "log_verbosity";
    pub const POLLER_INTERVAL: &str = "poller_interval";

    pub const ALL: &[&str] = &[
        PING_FAILURE_COUNT,
        PING_RECOVERY_COUNT,
        LOG_VERBOSITY,
        POLLER_INTERVAL,
    ];
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pollwatch.db")
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pollwatch.db".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `POLLWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `POLLWATCH_DB_PATH`: Database file path (default: "pollwatch.db")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("POLLWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("POLLWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        cfg
    }
}

/// A named-option lookup.
pub trait OptionSource {
    fn get_option(&self, name: &str) -> Option<String>;
}

/// Options from `POLLWATCH_<NAME>` environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOptions;

impl OptionSource for EnvOptions {
    fn get_option(&self, name: &str) -> Option<String> {
        env::var(format!("POLLWATCH_{}", name.to_ascii_uppercase())).ok()
    }
}

/// First source that has a value wins.
pub struct LayeredOptions<'a> {
    sources: Vec<&'a dyn OptionSource>,
}

impl<'a> LayeredOptions<'a> {
    pub fn new(sources: Vec<&'a dyn OptionSource>) -> Self {
        Self { sources }
    }
}

impl OptionSource for LayeredOptions<'_> {
    fn get_option(&self, name: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.get_option(name))
    }
}

/// Read and parse an option, falling back to `default` when it is missing
/// or does not parse.
fn parse_option<T>(source: &dyn OptionSource, name: &str, default: T) -> T
where
    T: FromStr,
{
    match source.get_option(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Ignoring invalid value {:?} for option {}", raw, name);
                default
            }
        },
        None => default,
    }
}

/// Check a value before it is written to the settings table.
pub fn validate_option(name: &str, value: &str) -> Result<(), String> {
    let value = value.trim();
    match name {
        options::PING_FAILURE_COUNT | options::PING_RECOVERY_COUNT => match value.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(()),
            _ => Err(format!("{} must be a whole number of at least 1", name)),
        },
        options::POLLER_INTERVAL => match value.parse::<u64>() {
            Ok(n) if n >= 1 => Ok(()),
            _ => Err(format!("{} must be a number of seconds of at least 1", name)),
        },
        options::LOG_VERBOSITY => value.parse::<LogVerbosity>().map(|_| ()),
        other => Err(format!("unknown option: {}", other)),
    }
}

impl TrackerConfig {
    /// Build tracker settings from an option source. Thresholds below 1 are
    /// raised to 1.
    pub fn load(source: &dyn OptionSource) -> Self {
        let defaults = Self::default();
        Self {
            ping_failure_count: parse_option(
                source,
                options::PING_FAILURE_COUNT,
                defaults.ping_failure_count,
            )
            .max(1),
            ping_recovery_count: parse_option(
                source,
                options::PING_RECOVERY_COUNT,
                defaults.ping_recovery_count,
            )
            .max(1),
            log_verbosity: parse_option::<LogVerbosity>(
                source,
                options::LOG_VERBOSITY,
                defaults.log_verbosity,
            ),
        }
    }
}

/// Poll scheduling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Time between polls of the same device.
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

impl PollerConfig {
    pub fn load(source: &dyn OptionSource) -> Self {
        let secs: u64 = parse_option(source, options::POLLER_INTERVAL, 300);
        Self {
            interval: Duration::from_secs(secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapOptions(HashMap<&'static str, &'static str>);

    impl OptionSource for MapOptions {
        fn get_option(&self, name: &str) -> Option<String> {
            self.0.get(name).map(|v| v.to_string())
        }
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "pollwatch.db");
    }

    #[test]
    fn test_tracker_defaults_when_unset() {
        let source = MapOptions(HashMap::new());
        let cfg = TrackerConfig::load(&source);
        assert_eq!(cfg, TrackerConfig::default());
        assert_eq!(PollerConfig::load(&source).interval, Duration::from_secs(300));
    }

    #[test]
    fn test_tracker_options_parsed() {
        let source = MapOptions(HashMap::from([
            ("ping_failure_count", "4"),
            ("ping_recovery_count", " 1 "),
            ("log_verbosity", "high"),
        ]));
        let cfg = TrackerConfig::load(&source);
        assert_eq!(cfg.ping_failure_count, 4);
        assert_eq!(cfg.ping_recovery_count, 1);
        assert_eq!(cfg.log_verbosity, LogVerbosity::High);
    }

    #[test]
    fn test_invalid_options_fall_back() {
        let source = MapOptions(HashMap::from([
            ("ping_failure_count", "many"),
            ("ping_recovery_count", "0"),
            ("log_verbosity", "7"),
            ("poller_interval", "-5"),
        ]));
        let cfg = TrackerConfig::load(&source);
        assert_eq!(cfg.ping_failure_count, 2);
        assert_eq!(cfg.ping_recovery_count, 1);
        assert_eq!(cfg.log_verbosity, LogVerbosity::Low);
        assert_eq!(PollerConfig::load(&source).interval, Duration::from_secs(300));
    }

    #[test]
    fn test_layered_options_prefer_first() {
        let top = MapOptions(HashMap::from([("ping_failure_count", "5")]));
        let bottom = MapOptions(HashMap::from([
            ("ping_failure_count", "1"),
            ("ping_recovery_count", "6"),
        ]));
        let layered = LayeredOptions::new(vec![&top as &dyn OptionSource, &bottom]);
        let cfg = TrackerConfig::load(&layered);
        assert_eq!(cfg.ping_failure_count, 5);
        assert_eq!(cfg.ping_recovery_count, 6);
    }

    #[test]
    fn test_validate_option() {
        assert!(validate_option("ping_failure_count", "3").is_ok());
        assert!(validate_option("ping_recovery_count", "0").is_err());
        assert!(validate_option("poller_interval", " 60 ").is_ok());
        assert!(validate_option("poller_interval", "soon").is_err());
        assert!(validate_option("log_verbosity", "debug").is_ok());
        assert!(validate_option("log_verbosity", "9").is_err());
        assert!(validate_option("snmp_retries", "1").is_err());
    }
}
