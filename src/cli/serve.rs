//! HTTP server command handler.

use std::net::SocketAddr;

use color_eyre::Result;

use crate::config::Config;
use crate::context::Context;
use crate::http;

use super::App;

impl App {
    /// Run the HTTP server.
    pub async fn run_serve(&self, host: Option<&str>, port: Option<u16>) -> Result<()> {
        tracing::info!("Starting Userbase HTTP server");

        let mut config = Config::load()?;
        if let Some(host) = host {
            config.server.host = host.to_string();
        }
        if let Some(port) = port {
            config.server.port = port;
        }
        tracing::info!(backend = %config.backend, "Loaded configuration");

        let host = config.server.host.clone();
        let port = config.server.port;

        let ctx = Context::connect(config)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to connect backend: {}", e))?;
        let app = http::router(ctx);

        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| color_eyre::eyre::eyre!("Invalid address {}:{}: {}", host, port, e))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to bind to {}: {}", addr, e))?;

        tracing::info!("Userbase HTTP server listening on http://{}", addr);

        axum::serve(listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            color_eyre::eyre::eyre!("HTTP server error: {}", e)
        })?;

        tracing::info!("HTTP server shutting down");
        Ok(())
    }
}
