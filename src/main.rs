//! Userbase - user account HTTP service

use clap::Parser;
use tracing_subscriber::EnvFilter;

use userbase::cli::App;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let app = App::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_filter = if app.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    app.run().await
}
