use std::str::FromStr;

use crate::engine::ReservationPolicy;
use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::{HOUR, MINUTE, Ms};

/// Server settings, read from `ROOMRES_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub policy: ReservationPolicy,
    /// How long finished reservations are kept before the reaper drops them.
    pub retention: Ms,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5480,
            max_connections: 256,
            metrics_port: None,
            policy: ReservationPolicy::default(),
            retention: 7 * 24 * HOUR,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let policy = defaults.policy;

        let max_duration_minutes: Ms =
            parse_or(&lookup, "ROOMRES_MAX_DURATION_MINUTES", policy.max_duration / MINUTE)?;
        let window_hours: Ms = parse_or(&lookup, "ROOMRES_WINDOW_HOURS", policy.window / HOUR)?;
        let quick_minutes: Ms =
            parse_or(&lookup, "ROOMRES_QUICK_MINUTES", policy.quick_duration / MINUTE)?;
        let retention_hours: Ms =
            parse_or(&lookup, "ROOMRES_RETENTION_HOURS", defaults.retention / HOUR)?;

        for (key, value) in [
            ("ROOMRES_MAX_DURATION_MINUTES", max_duration_minutes),
            ("ROOMRES_WINDOW_HOURS", window_hours),
            ("ROOMRES_QUICK_MINUTES", quick_minutes),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid { key, value: value.to_string() });
            }
        }
        if retention_hours < 0 {
            return Err(ConfigError::Invalid {
                key: "ROOMRES_RETENTION_HOURS",
                value: retention_hours.to_string(),
            });
        }

        let max_duration = scaled("ROOMRES_MAX_DURATION_MINUTES", max_duration_minutes, MINUTE)?;
        let window = scaled("ROOMRES_WINDOW_HOURS", window_hours, HOUR)?;
        let quick_duration = scaled("ROOMRES_QUICK_MINUTES", quick_minutes, MINUTE)?;
        let retention = scaled("ROOMRES_RETENTION_HOURS", retention_hours, HOUR)?;
        // The default query window must pass the query window limit.
        if window > MAX_QUERY_WINDOW_MS {
            return Err(ConfigError::Invalid {
                key: "ROOMRES_WINDOW_HOURS",
                value: window_hours.to_string(),
            });
        }

        let metrics_port = match lookup("ROOMRES_METRICS_PORT") {
            Some(raw) => Some(parse_value("ROOMRES_METRICS_PORT", &raw)?),
            None => None,
        };

        Ok(Self {
            bind: lookup("ROOMRES_BIND").unwrap_or(defaults.bind),
            port: parse_or(&lookup, "ROOMRES_PORT", defaults.port)?,
            max_connections: parse_or(&lookup, "ROOMRES_MAX_CONNECTIONS", defaults.max_connections)?,
            metrics_port,
            policy: ReservationPolicy {
                max_duration,
                window,
                quick_duration,
            },
            retention,
        })
    }
}

/// `value` in `unit` milliseconds, or an error if that does not fit an `Ms`.
fn scaled(key: &'static str, value: Ms, unit: Ms) -> Result<Ms, ConfigError> {
    value.checked_mul(unit).ok_or_else(|| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}
