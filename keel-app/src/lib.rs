//! The keel application: logs its identity on start and on completion.

use di::{Ref, ServiceCollection, singleton_as_self};
use keel_bootstrap::{AppSettings, Module};
use tracing::info;

/// Runs the application once.
pub fn run(settings: &AppSettings) {
    info!(
        app.name = settings.name(),
        app.version = settings.version(),
        "Starting {} v{}",
        settings.name(),
        settings.version()
    );

    // application logic goes here

    info!("Application finished");
}

/// The application service, resolved from the service provider.
pub struct Application {
    settings: Ref<AppSettings>,
}

impl Application {
    pub fn new(settings: Ref<AppSettings>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn run(&self) {
        run(&self.settings);
    }
}

/// Registers [`Application`] with the service collection.
pub struct AppModule;

impl Module for AppModule {
    fn configure(&self, binder: &mut ServiceCollection) {
        binder.add(
            singleton_as_self::<Application>()
                .from(|sp| Ref::new(Application::new(sp.get_required::<AppSettings>()))),
        );
    }
}
