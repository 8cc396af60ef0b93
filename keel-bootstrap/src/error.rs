use config::ConfigError;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("unable to load config: {0}")]
    ConfigLoadError(#[source] ConfigError),
    #[error("invalid `{prefix}` settings: {source}")]
    InvalidSettingsError {
        prefix: &'static str,
        #[source]
        source: ConfigError,
    },
    #[error("missing config value: {0}")]
    MissingConfigValueError(String),
    #[error("invalid config value: {0}")]
    InvalidConfigValueError(String),
    #[error("unable to create log file `{path}`: {reason}")]
    LogFileCreationError { path: String, reason: String },
    #[error("unable to initialize tracing subscriber: {0}")]
    TracingSubscriberInitError(#[from] TryInitError),
    #[error("unable to show config: {0}")]
    ConfigShowError(#[source] ConfigError),
    #[error("bootstrap is not initialized, call `initialize` first")]
    NotInitializedError,
    #[error("unable to build service provider: {0}")]
    ServiceProviderError(String),
}
