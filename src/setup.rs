//! Framework bootstrap: mode selection, logging wiring, sink installation.
//!
//! A [`Setup`] is configured fluently and consumed by [`Setup::boot`],
//! which resolves the layered configuration, installs a `tracing`
//! subscriber formatted for the selected [`Mode`], installs the process
//! failure sink when one was supplied, and hands back the [`Chassis`].
//!
//! ```no_run
//! use chassis::{Mode, Setup};
//!
//! let chassis = Setup::new(Mode::Dev).boot().expect("boot failed");
//! let cell = chassis.deferred::<u64>();
//! # drop(cell);
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Once};

use serde::Deserialize;

use crate::config::{ChassisConfig, ConfigError, LogLevel};
use crate::deferred::Deferred;
use crate::sink::{self, FailureSink};

/// The mode the framework runs in; mainly affects logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Development: human-oriented console output.
    Dev,
    /// Testing: output captured per test.
    Test,
    /// Production: compact output.
    Prod,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" => Ok(Self::Prod),
            other => Err(format!("expected one of dev/test/prod, got {other:?}")),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        };
        f.write_str(name)
    }
}

/// Configures the bootstrap of the chassis.
///
/// Programmatic settings take precedence over environment variables, which
/// take precedence over the config file.
#[derive(Default)]
pub struct Setup {
    mode: Option<Mode>,
    default_log_level: Option<LogLevel>,
    config_file: Option<PathBuf>,
    sink: Option<Arc<dyn FailureSink>>,
}

impl Setup {
    /// Creates a setup for the given mode.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// Creates a setup that takes the mode from configuration alone.
    #[must_use]
    pub fn from_environment() -> Self {
        Self::default()
    }

    /// Overrides the log level regardless of file or environment settings.
    #[must_use]
    pub fn with_default_log_level(mut self, level: LogLevel) -> Self {
        self.default_log_level = Some(level);
        self
    }

    /// Points the setup at a TOML config file.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Installs the given failure sink at boot.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Boots the chassis: resolves configuration, wires logging, installs
    /// the failure sink, and returns the running handle.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the config file or an environment
    /// variable cannot be parsed.
    pub fn boot(self) -> Result<Chassis, ConfigError> {
        let mut config = ChassisConfig::load(self.config_file.as_deref())?;
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(level) = self.default_log_level {
            config.log_level = level;
        }

        init_subscriber(&config);
        if let Some(sink) = self.sink {
            sink::install(sink);
        }

        tracing::info!(
            mode = %config.mode,
            version = env!("CARGO_PKG_VERSION"),
            "chassis booted"
        );
        Ok(Chassis { config })
    }
}

/// The running chassis: resolved configuration plus factories.
#[derive(Debug, Clone)]
pub struct Chassis {
    config: ChassisConfig,
}

impl Chassis {
    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &ChassisConfig {
        &self.config
    }

    /// Creates a pending deferred value sized per the configuration.
    #[must_use]
    pub fn deferred<V: Send + Sync + 'static>(&self) -> Deferred<V> {
        Deferred::with_handler_capacity(self.config.handler_capacity)
    }
}

/// Installs the global subscriber once; a subscriber installed earlier by
/// the host wins.
fn init_subscriber(config: &ChassisConfig) {
    static INIT: Once = Once::new();
    let level: tracing::Level = config.log_level.into();
    let ansi = config.log_ansi;
    let mode = config.mode;
    INIT.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(ansi)
            .with_target(true);
        let _ = match mode {
            Mode::Dev => builder.try_init(),
            Mode::Test => builder.with_test_writer().try_init(),
            Mode::Prod => builder.compact().try_init(),
        };
    });
}
