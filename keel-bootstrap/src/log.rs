use std::{collections::HashSet, fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    config::{Config, ConfigPrefix},
    error::BootstrapError,
};

pub const ROOT_LOGGER: &str = "root";

/// Logging configuration, read from the `[logging]` table.
///
/// ```toml
/// [[logging.loggers]]
/// name = "root"
/// level = "info"
///
/// [logging.console_appender]
/// write_level = "debug"
/// logger_names = ["root"]
///
/// [[logging.file_appenders]]
/// file_path = "logs/keel.log"
/// logger_names = ["root"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    loggers: Vec<Logger>,
    console_appender: Option<ConsoleAppenderConfig>,
    file_appenders: Vec<FileAppenderConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            loggers: vec![Logger::default()],
            console_appender: Some(ConsoleAppenderConfig::default()),
            file_appenders: vec![],
        }
    }
}

impl LoggingConfig {
    pub fn new(config: &Config) -> Result<Self, BootstrapError> {
        let logging_config: Self = config
            .get()
            .map_err(|source| BootstrapError::InvalidSettingsError {
                prefix: Self::PREFIX,
                source,
            })?;
        logging_config.validate()?;
        Ok(logging_config)
    }

    pub fn loggers(&self) -> &[Logger] {
        &self.loggers
    }

    pub fn console_appender_config(&self) -> Option<&ConsoleAppenderConfig> {
        self.console_appender.as_ref()
    }

    pub fn file_appender_config(&self) -> &[FileAppenderConfig] {
        &self.file_appenders
    }

    pub fn logger(&self, name: &str) -> Option<&Logger> {
        self.loggers.iter().find(|logger| logger.name == name)
    }

    fn validate(&self) -> Result<(), BootstrapError> {
        let mut names = HashSet::new();
        for logger in &self.loggers {
            if !names.insert(logger.name.as_str()) {
                return Err(BootstrapError::InvalidConfigValueError(format!(
                    "logging.loggers[?].name={} is declared twice",
                    logger.name
                )));
            }
        }

        if let Some(console) = &self.console_appender {
            self.validate_logger_names("logging.console_appender", &console.logger_names)?;
            Self::validate_write_level("logging.console_appender", console.write_level)?;
        }
        for (index, file) in self.file_appenders.iter().enumerate() {
            let key = format!("logging.file_appenders[{}]", index);
            self.validate_logger_names(&key, &file.logger_names)?;
            Self::validate_write_level(&key, file.write_level)?;
            if file.enable && file.file_path.as_os_str().is_empty() {
                return Err(BootstrapError::MissingConfigValueError(format!(
                    "{}.file_path",
                    key
                )));
            }
            if file.enable && file.file_max_count == 0 {
                return Err(BootstrapError::InvalidConfigValueError(format!(
                    "{}.file_max_count=0",
                    key
                )));
            }
        }
        Ok(())
    }

    fn validate_logger_names(
        &self,
        key: &str,
        logger_names: &[String],
    ) -> Result<(), BootstrapError> {
        match logger_names.iter().find(|name| self.logger(name).is_none()) {
            Some(unknown) => Err(BootstrapError::InvalidConfigValueError(format!(
                "{}.logger_names references undeclared logger `{}`",
                key, unknown
            ))),
            None => Ok(()),
        }
    }

    fn validate_write_level(key: &str, level: Level) -> Result<(), BootstrapError> {
        if level.as_tracing_level().is_none() {
            return Err(BootstrapError::InvalidConfigValueError(format!(
                "{}.write_level={:?}",
                key, level
            )));
        }
        Ok(())
    }
}

impl ConfigPrefix for LoggingConfig {
    const PREFIX: &'static str = "logging";
}

/// A named logger: the `tracing` target it covers and the level it lets through.
///
/// An empty target applies to every target not matched by another logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Logger {
    name: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    level: Level,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            name: ROOT_LOGGER.to_string(),
            target: String::new(),
            level: Level::Info,
        }
    }
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleAppenderConfig {
    enable: bool,
    write_level: Level,
    logger_names: Vec<String>,
}

impl Default for ConsoleAppenderConfig {
    fn default() -> Self {
        Self {
            enable: true,
            write_level: Level::Info,
            logger_names: vec![ROOT_LOGGER.to_string()],
        }
    }
}

impl ConsoleAppenderConfig {
    pub fn enable(&self) -> bool {
        self.enable
    }

    pub fn write_level(&self) -> Level {
        self.write_level
    }

    pub fn logger_names(&self) -> &[String] {
        &self.logger_names
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileAppenderConfig {
    enable: bool,
    write_level: Level,
    file_path: PathBuf,
    /// Number of rolled files kept next to the active one.
    file_max_count: usize,
    /// Size in bytes after which the file is rolled.
    file_max_size: u64,
    logger_names: Vec<String>,
}

impl Default for FileAppenderConfig {
    fn default() -> Self {
        Self {
            enable: true,
            write_level: Level::Info,
            file_path: PathBuf::new(),
            file_max_count: 10,
            file_max_size: 10 * 1024 * 1024,
            logger_names: vec![ROOT_LOGGER.to_string()],
        }
    }
}

impl FileAppenderConfig {
    pub fn enable(&self) -> bool {
        self.enable
    }

    pub fn write_level(&self) -> Level {
        self.write_level
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    pub fn file_max_count(&self) -> usize {
        self.file_max_count
    }

    pub fn file_max_size(&self) -> u64 {
        self.file_max_size
    }

    pub fn logger_names(&self) -> &[String] {
        &self.logger_names
    }
}

/// Keeps the non-blocking appender workers alive.
///
/// Pending records are flushed when this is dropped.
pub struct AppenderGuard {
    guards: Vec<WorkerGuard>,
}

impl AppenderGuard {
    pub fn new(guards: Vec<WorkerGuard>) -> Self {
        Self { guards }
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

const LEVEL_NAMES: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Default, Copy, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// The "trace" level.
    Trace,
    /// The "debug" level.
    Debug,
    /// The "info" level.
    #[default]
    Info,
    /// The "warn" level.
    Warn,
    /// The "error" level.
    Error,
    /// Off level.
    Off,
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| <D::Error as serde::de::Error>::unknown_variant(&s, &LEVEL_NAMES))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct ParseLevelError;

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected one of {}", LEVEL_NAMES.join(", "))
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "off" => Ok(Level::Off),
            _ => Err(ParseLevelError),
        }
    }
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }

    /// `None` for [`Level::Off`], which cannot be written at.
    pub fn as_tracing_level(&self) -> Option<tracing::Level> {
        match self {
            Level::Trace => Some(tracing::Level::TRACE),
            Level::Debug => Some(tracing::Level::DEBUG),
            Level::Info => Some(tracing::Level::INFO),
            Level::Warn => Some(tracing::Level::WARN),
            Level::Error => Some(tracing::Level::ERROR),
            Level::Off => None,
        }
    }

    pub fn as_tracing_level_filter(&self) -> LevelFilter {
        self.as_tracing_level()
            .map_or(LevelFilter::OFF, LevelFilter::from_level)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
