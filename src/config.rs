//! Layered configuration for the chassis.
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set on [`Setup`](crate::setup::Setup)
//! 2. **Environment variables** — `CHASSIS_*` overrides
//! 3. **Config file** — a TOML file, when one is given
//! 4. **Defaults** — [`ChassisConfig::default`]
//!
//! # Supported environment variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CHASSIS_MODE` | `dev` / `test` / `prod` | `mode` |
//! | `CHASSIS_LOG_LEVEL` | `trace` … `error` | `log_level` |
//! | `CHASSIS_LOG_ANSI` | `bool` | `log_ansi` |
//! | `CHASSIS_HANDLER_CAPACITY` | `usize` | `handler_capacity` |
//!
//! # File format
//!
//! ```toml
//! mode = "dev"
//!
//! [logging]
//! level = "debug"
//! ansi = true
//!
//! [deferred]
//! handler_capacity = 4
//! ```

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::deferred::DEFAULT_HANDLER_CAPACITY;
use crate::setup::Mode;

/// Environment variable selecting the run mode.
pub const ENV_MODE: &str = "CHASSIS_MODE";
/// Environment variable for the minimum log level.
pub const ENV_LOG_LEVEL: &str = "CHASSIS_LOG_LEVEL";
/// Environment variable toggling ANSI colour in log output.
pub const ENV_LOG_ANSI: &str = "CHASSIS_LOG_ANSI";
/// Environment variable for the initial handler-list capacity of new cells.
pub const ENV_HANDLER_CAPACITY: &str = "CHASSIS_HANDLER_CAPACITY";

/// Error raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable or field held an unparseable value.
    #[error("invalid value for {variable}: {detail}")]
    InvalidValue {
        /// The offending variable or field.
        variable: String,
        /// What was wrong with it.
        detail: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The config file could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// The file path.
        path: String,
        /// The underlying TOML error.
        source: toml::de::Error,
    },
}

/// Minimum severity for emitted log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Developer diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Something looks off.
    Warn,
    /// Least verbose.
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "expected one of trace/debug/info/warn/error, got {other:?}"
            )),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Resolved chassis configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisConfig {
    /// The run mode; affects log formatting.
    pub mode: Mode,
    /// Minimum log level for the subscriber installed at boot.
    pub log_level: LogLevel,
    /// Whether log output uses ANSI colour.
    pub log_ansi: bool,
    /// Initial handler-list capacity for cells created via the chassis.
    pub handler_capacity: usize,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Prod,
            log_level: LogLevel::Info,
            log_ansi: true,
            handler_capacity: DEFAULT_HANDLER_CAPACITY,
        }
    }
}

impl ChassisConfig {
    /// Resolves a configuration from defaults, an optional TOML file, and
    /// environment overrides, in that order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unreadable or unparseable input.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = file {
            config.apply_file(path)?;
        }
        config.apply_env_overrides()?;
        config.normalize();
        Ok(config)
    }

    /// Applies settings from a TOML file. Absent fields are left untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        if let Some(mode) = file.mode {
            self.mode = mode;
        }
        if let Some(level) = file.logging.level {
            self.log_level = level;
        }
        if let Some(ansi) = file.logging.ansi {
            self.log_ansi = ansi;
        }
        if let Some(capacity) = file.deferred.handler_capacity {
            self.handler_capacity = capacity;
        }
        Ok(())
    }

    /// Applies `CHASSIS_*` environment overrides.
    ///
    /// Only variables that are set are applied.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a variable is set but unparseable.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env(ENV_MODE) {
            self.mode = parse_with(ENV_MODE, &value, Mode::from_str)?;
        }
        if let Some(value) = read_env(ENV_LOG_LEVEL) {
            self.log_level = parse_with(ENV_LOG_LEVEL, &value, LogLevel::from_str)?;
        }
        if let Some(value) = read_env(ENV_LOG_ANSI) {
            self.log_ansi = parse_bool(ENV_LOG_ANSI, &value)?;
        }
        if let Some(value) = read_env(ENV_HANDLER_CAPACITY) {
            self.handler_capacity = parse_usize(ENV_HANDLER_CAPACITY, &value)?;
        }
        Ok(())
    }

    /// Clamps values to safe ranges.
    pub fn normalize(&mut self) {
        if self.handler_capacity == 0 {
            self.handler_capacity = DEFAULT_HANDLER_CAPACITY;
        }
    }
}

/// TOML-deserializable configuration, grouped into tables.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    mode: Option<Mode>,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    deferred: DeferredSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    level: Option<LogLevel>,
    ansi: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeferredSection {
    handler_capacity: Option<usize>,
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_with<T, E: std::fmt::Display>(
    variable: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    parse(value).map_err(|e| ConfigError::InvalidValue {
        variable: variable.to_string(),
        detail: e.to_string(),
    })
}

fn parse_usize(variable: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            variable: variable.to_string(),
            detail: format!("expected unsigned integer, got {value:?} ({e})"),
        })
}

fn parse_bool(variable: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            variable: variable.to_string(),
            detail: format!("expected bool (true/false/1/0/yes/no), got {value:?}"),
        }),
    }
}
