use std::{
    cell::RefCell,
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    config::{CONFIG_FILE_NAME, Config},
    error::BootstrapError,
    log::{AppenderGuard, ConsoleAppenderConfig, FileAppenderConfig, LoggingConfig},
    module::Module,
    settings::AppSettings,
};
use di::{Ref, ServiceCollection, ServiceProvider, singleton_as_self};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_rolling_file::RollingFileAppenderBase;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::Targets, fmt::writer::MakeWriterExt, layer::SubscriberExt,
    util::SubscriberInitExt,
};
use typed_builder::TypedBuilder;

/// The global subscriber can only be installed once per process.
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Bootstrap is the entry point of the application.
///
/// It is responsible for initializing the application, including loading the configuration,
/// reading the application settings, initializing the logging, and building the service
/// provider.
///
/// # Example
/// ```no_run
/// use keel_bootstrap::Bootstrap;
/// let bootstrap = Bootstrap::builder()
///     .app_name("demo")
///     .app_version("0.1.0")
///     .build();
/// bootstrap.initialize().unwrap();
/// ```
///
#[derive(TypedBuilder)]
pub struct Bootstrap {
    /// Whether need to initialize logging.
    #[builder(default = true)]
    initialize_logging: bool,
    /// Whether need to print config.
    #[builder(default = false)]
    show_config: bool,

    /// Folder holding `config.toml`, see [`Config::default_folder`] when unset.
    #[builder(default, setter(strip_option, into))]
    config_folder: Option<PathBuf>,
    /// Prefix of environment variables to override config values.
    #[builder(default = Some("KEEL".to_string()), setter(into))]
    env_config_prefix: Option<String>,
    /// Separator of environment variables to override config values.
    #[builder(default = "__".to_string(), setter(into))]
    env_config_split: String,

    /// Default for `app.name`.
    #[builder(default, setter(strip_option, into))]
    app_name: Option<String>,
    /// Default for `app.version`.
    #[builder(default, setter(strip_option, into))]
    app_version: Option<String>,

    /// a collection of modules
    #[builder(default = vec![])]
    modules: Vec<Box<dyn Module>>,

    #[builder(default, setter(skip))]
    base_modules: RefCell<BootstrapBaseModule>,
}

impl Bootstrap {
    pub fn initialize(&self) -> Result<(), BootstrapError> {
        // first we try to initialize config
        self.initialize_config()?;
        self.initialize_settings()?;
        // then we try to initialize logging by logger config
        self.initialize_logging()?;
        self.report_config_source();
        if self.show_config {
            // after logging initialized, we show config if needed
            self.show_config()?;
        }
        Ok(())
    }

    pub fn initialize_config(&self) -> Result<(), BootstrapError> {
        let mut defaults: Vec<(&str, &str)> = Vec::new();
        if let Some(name) = &self.app_name {
            defaults.push(("app.name", name.as_str()));
        }
        if let Some(version) = &self.app_version {
            defaults.push(("app.version", version.as_str()));
        }
        let config = Config::from_folder(
            self.config_folder(),
            &defaults,
            self.env_config_prefix.as_deref(),
            &self.env_config_split,
        )
        .map_err(BootstrapError::ConfigLoadError)?;
        self.base_modules.borrow_mut().config = Some(Ref::new(config));
        Ok(())
    }

    pub fn initialize_settings(&self) -> Result<(), BootstrapError> {
        let config = self.config().ok_or(BootstrapError::NotInitializedError)?;
        let settings = AppSettings::from_config(&config)?;
        self.base_modules.borrow_mut().settings = Some(Ref::new(settings));
        Ok(())
    }

    pub fn initialize_logging(&self) -> Result<(), BootstrapError> {
        if !self.initialize_logging {
            return Ok(());
        }
        self.initialize_logging_config()?;
        if LOGGING_INITIALIZED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("logging already initialized, keeping the installed subscriber");
            return Ok(());
        }
        if let Err(e) = self.initialize_logging_loggers() {
            // nothing was installed, let a later call try again
            LOGGING_INITIALIZED.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    fn initialize_logging_config(&self) -> Result<(), BootstrapError> {
        let config = self.config().ok_or(BootstrapError::NotInitializedError)?;
        let logging_config = LoggingConfig::new(&config)?;
        self.base_modules.borrow_mut().logging_config = Some(Ref::new(logging_config));
        Ok(())
    }

    fn initialize_logging_loggers(&self) -> Result<(), BootstrapError> {
        let logging_config = self
            .base_modules
            .borrow()
            .logging_config
            .clone()
            .ok_or(BootstrapError::NotInitializedError)?;
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut writer_guards = Vec::new();

        for file_config in logging_config.file_appender_config() {
            if file_config.enable() {
                let (non_blocking_file_writer, targets, level, file_writer_guard) =
                    Self::initialize_logging_file_tracing(file_config, &logging_config)?;
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking_file_writer.with_max_level(level))
                    .with_filter(targets);
                layers.push(file_layer.boxed());
                writer_guards.push(file_writer_guard);
            }
        }
        if let Some(console_config) = logging_config
            .console_appender_config()
            .filter(|console| console.enable())
        {
            let (non_blocking_console_writer, targets, level, console_writer_guard) =
                Self::initialize_logging_console_tracing(console_config, &logging_config)?;
            let console_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_console_writer.with_max_level(level));
            let rust_log = env::var(EnvFilter::DEFAULT_ENV).ok();
            match console_filter(rust_log.as_deref(), targets) {
                ConsoleFilter::Env(filter) => {
                    layers.push(console_layer.with_filter(filter).boxed())
                }
                ConsoleFilter::Targets(targets) => {
                    layers.push(console_layer.with_filter(targets).boxed())
                }
            }
            writer_guards.push(console_writer_guard);
        }

        tracing_subscriber::registry().with(layers).try_init()?;
        // save guards to keep the writers alive
        self.base_modules.borrow_mut().logger = Some(Ref::new(AppenderGuard::new(writer_guards)));
        Ok(())
    }

    fn initialize_logging_console_tracing(
        appender_config: &ConsoleAppenderConfig,
        logging_config: &LoggingConfig,
    ) -> Result<(NonBlocking, Targets, Level, WorkerGuard), BootstrapError> {
        // get write level from appender config
        let Some(level) = appender_config.write_level().as_tracing_level() else {
            return Err(BootstrapError::InvalidConfigValueError(format!(
                "logging.console_appender.write_level={:?}",
                appender_config.write_level()
            )));
        };
        let targets = Self::targets(appender_config.logger_names(), logging_config);
        let (non_blocking_console_writer, console_writer_guard) =
            tracing_appender::non_blocking(std::io::stdout());
        Ok((
            non_blocking_console_writer,
            targets,
            level,
            console_writer_guard,
        ))
    }

    fn initialize_logging_file_tracing(
        appender_config: &FileAppenderConfig,
        logging_config: &LoggingConfig,
    ) -> Result<(NonBlocking, Targets, Level, WorkerGuard), BootstrapError> {
        // get write level from appender config
        let Some(level) = appender_config.write_level().as_tracing_level() else {
            return Err(BootstrapError::InvalidConfigValueError(format!(
                "logging.file_appenders[?].write_level={:?}",
                appender_config.write_level()
            )));
        };
        let file_path = appender_config.file_path();
        let filename = file_path.to_string_lossy().into_owned();
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| BootstrapError::LogFileCreationError {
                path: filename.clone(),
                reason: e.to_string(),
            })?;
        }
        // build file layer
        let file_appender = RollingFileAppenderBase::builder()
            .filename(filename.clone())
            .max_filecount(appender_config.file_max_count())
            .condition_max_file_size(appender_config.file_max_size())
            .condition_daily()
            .build()
            .map_err(|e| BootstrapError::LogFileCreationError {
                path: filename,
                reason: e.to_string(),
            })?;
        let targets = Self::targets(appender_config.logger_names(), logging_config);
        let (non_blocking_file_writer, file_writer_guard) =
            tracing_appender::non_blocking(file_appender);
        Ok((non_blocking_file_writer, targets, level, file_writer_guard))
    }

    /// Folds the named loggers of an appender into a target filter.
    fn targets(logger_names: &[String], logging_config: &LoggingConfig) -> Targets {
        logger_names
            .iter()
            .map(String::as_str)
            .collect::<HashSet<&str>>()
            .into_iter()
            // names were validated when the logging config was loaded
            .filter_map(|name| logging_config.logger(name))
            .fold(Targets::new(), |acc, logger| {
                if logger.target().is_empty() {
                    acc.with_default(logger.level().as_tracing_level_filter())
                } else {
                    acc.with_target(logger.target(), logger.level().as_tracing_level_filter())
                }
            })
    }

    fn report_config_source(&self) {
        let Some(config) = self.config() else {
            return;
        };
        match config.source_file() {
            Some(file) => tracing::info!("loaded config `{}`", file.display()),
            None => tracing::warn!(
                "not found config `{}`",
                self.config_folder().join(CONFIG_FILE_NAME).display()
            ),
        }
    }

    pub fn show_config(&self) -> Result<(), BootstrapError> {
        if let Some(config) = self.config() {
            let properties = config
                .to_properties()
                .map_err(BootstrapError::ConfigShowError)?;
            for (key, value) in properties.get_properties() {
                tracing::info!("load config {}={}", key, value);
            }
        }
        Ok(())
    }

    /// Builds a service provider with the base services and every module's services.
    pub fn service_provider(&self) -> Result<ServiceProvider, BootstrapError> {
        let mut services = ServiceCollection::new();
        {
            let base_modules = self.base_modules.borrow();
            if base_modules.config.is_none() || base_modules.settings.is_none() {
                return Err(BootstrapError::NotInitializedError);
            }
            base_modules.configure(&mut services);
        }
        for module in &self.modules {
            module.configure(&mut services);
        }
        services
            .build_provider()
            .map_err(|e| BootstrapError::ServiceProviderError(e.to_string()))
    }

    pub fn config(&self) -> Option<Ref<Config>> {
        self.base_modules.borrow().config.clone()
    }

    pub fn settings(&self) -> Option<Ref<AppSettings>> {
        self.base_modules.borrow().settings.clone()
    }

    pub fn logging_config(&self) -> Option<Ref<LoggingConfig>> {
        self.base_modules.borrow().logging_config.clone()
    }

    /// Guards of the appenders this bootstrap installed, if it installed the subscriber.
    pub fn appender_guard(&self) -> Option<Ref<AppenderGuard>> {
        self.base_modules.borrow().logger.clone()
    }

    fn config_folder(&self) -> &Path {
        self.config_folder
            .as_deref()
            .unwrap_or_else(|| Config::default_folder())
    }
}

/// Filter applied to the console appender.
enum ConsoleFilter {
    Env(EnvFilter),
    Targets(Targets),
}

/// A usable `RUST_LOG` wins over the configured loggers on the console.
fn console_filter(rust_log: Option<&str>, targets: Targets) -> ConsoleFilter {
    match rust_log
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .map(EnvFilter::try_new)
    {
        Some(Ok(filter)) => ConsoleFilter::Env(filter),
        _ => ConsoleFilter::Targets(targets),
    }
}

#[derive(Default)]
struct BootstrapBaseModule {
    config: Option<Ref<Config>>,
    settings: Option<Ref<AppSettings>>,
    logger: Option<Ref<AppenderGuard>>,
    logging_config: Option<Ref<LoggingConfig>>,
}

impl Module for BootstrapBaseModule {
    fn configure(&self, binder: &mut ServiceCollection) {
        // register base services
        Self::register_service::<Config>(&self.config, binder);
        Self::register_service::<AppSettings>(&self.settings, binder);
        Self::register_service::<LoggingConfig>(&self.logging_config, binder);
        Self::register_service::<AppenderGuard>(&self.logger, binder);
    }
}

impl BootstrapBaseModule {
    /// register an already built service as a singleton.
    fn register_service<T: Send + Sync + 'static>(
        service: &Option<Ref<T>>,
        binder: &mut ServiceCollection,
    ) {
        if let Some(svc) = service.clone() {
            binder.add(singleton_as_self::<T>().from(move |_| svc.clone()));
        }
    }
}
