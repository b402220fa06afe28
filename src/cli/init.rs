//! Init command handler.

use color_eyre::Result;

use crate::config::Config;
use crate::repositories;

use super::App;

impl App {
    /// Run the init command to create the `users` table.
    pub async fn run_init(&self) -> Result<()> {
        let config = Config::load()?;
        tracing::info!(backend = %config.backend, "Loaded configuration");

        let provisioned = repositories::init_schema(&config)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Schema initialization failed: {}", e))?;

        if provisioned {
            tracing::info!("users table ready");
        } else {
            tracing::info!(backend = %config.backend, "Backend has no schema to provision");
        }

        Ok(())
    }
}
