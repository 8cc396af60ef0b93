//! Startup plumbing shared by keel binaries: layered configuration,
//! application settings, `tracing` setup and the service container.

pub mod bootstrap;
pub mod config;
pub mod de;
pub mod error;
pub mod log;
pub mod module;
pub mod settings;

pub use bootstrap::Bootstrap;
pub use error::BootstrapError;
pub use module::Module;
pub use settings::AppSettings;
