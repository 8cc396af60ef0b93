use anyhow::Context;
use keel_app::{AppModule, Application};
use keel_bootstrap::{Bootstrap, Module};

fn main() -> anyhow::Result<()> {
    let bootstrap = Bootstrap::builder()
        .app_name(env!("CARGO_PKG_NAME"))
        .app_version(env!("CARGO_PKG_VERSION"))
        .modules(vec![Box::new(AppModule) as Box<dyn Module>])
        .build();
    bootstrap
        .initialize()
        .context("failed to initialize application")?;
    let provider = bootstrap
        .service_provider()
        .context("failed to build service provider")?;

    provider.get_required::<Application>().run();
    // bootstrap drops last, flushing the log appenders
    Ok(())
}
