//! The config for the nightshift operator

use serde::{Deserialize, Serialize};
use std::path::Path;

/// The log levels the operator supports
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Log nothing at all
    Off,
    /// Log only errors
    Error,
    /// Log warnings and errors
    Warn,
    /// Log general info
    Info,
    /// Log debug info
    Debug,
    /// Log everything
    Trace,
}

impl LogLevel {
    /// Get this level as a tracing filter directive
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Serde helper for the default log level
fn default_level() -> LogLevel {
    LogLevel::Info
}

/// Tracing settings for the operator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tracing {
    /// The log level to fall back on when RUST_LOG is not set
    #[serde(default = "default_level")]
    pub level: LogLevel,
}

impl Default for Tracing {
    fn default() -> Self {
        Tracing {
            level: default_level(),
        }
    }
}

/// Serde helper for the default converging requeue interval
fn default_converging() -> u64 {
    5
}

/// Serde helper for the default steady requeue interval
fn default_steady() -> u64 {
    60
}

/// Serde helper for the default overridden requeue interval
fn default_overridden() -> u64 {
    300
}

/// How quickly reconciles get requeued
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Requeue {
    /// Seconds between reconciles while a target is still converging
    #[serde(default = "default_converging")]
    pub converging: u64,
    /// Seconds between reconciles once a target has settled
    #[serde(default = "default_steady")]
    pub steady: u64,
    /// Seconds between reconciles for configs overridden by a group
    #[serde(default = "default_overridden")]
    pub overridden: u64,
}

impl Default for Requeue {
    fn default() -> Self {
        Requeue {
            converging: default_converging(),
            steady: default_steady(),
            overridden: default_overridden(),
        }
    }
}

/// Serde helper for the default barrier timeout
fn default_timeout() -> i64 {
    60
}

/// Settings for the scaling engine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scaling {
    /// Seconds a target may sit converging before the stage barrier is bypassed
    #[serde(default = "default_timeout")]
    pub timeout: i64,
}

impl Default for Scaling {
    fn default() -> Self {
        Scaling {
            timeout: default_timeout(),
        }
    }
}

/// Serde helper for the default operator namespace
fn default_namespace() -> String {
    "nightshift".to_owned()
}

/// The config for the nightshift operator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conf {
    /// The namespace nightshift's own resources live in
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// How quickly reconciles get requeued
    #[serde(default)]
    pub requeue: Requeue,
    /// Settings for the scaling engine
    #[serde(default)]
    pub scaling: Scaling,
    /// Tracing settings for the operator
    #[serde(default)]
    pub tracing: Tracing,
}

impl Default for Conf {
    fn default() -> Self {
        Conf {
            namespace: default_namespace(),
            requeue: Requeue::default(),
            scaling: Scaling::default(),
            tracing: Tracing::default(),
        }
    }
}

impl Conf {
    /// Creates a new [Conf] object
    ///
    /// # Arguments
    ///
    /// * `path` - The path to use when reading the config file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // load from a file first if one exists
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            // then overlay any environment args ontop
            .add_source(
                config::Environment::with_prefix("nightshift")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
