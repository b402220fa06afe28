//! CLI module for Userbase.
//!
//! Subcommands:
//! - `serve`: Run the HTTP server
//! - `init`: Create the `users` table for the SQL backends

mod init;
mod serve;

use clap::{Parser, Subcommand};

/// Userbase - user account service
#[derive(Parser)]
#[command(name = "userbase")]
#[command(about = "User account HTTP service over Neo4j, PostgreSQL, MongoDB or CockroachDB")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the users table (PostgreSQL and CockroachDB)
    Init,

    /// Run the HTTP server
    Serve {
        /// Host address to bind to (overrides HOST / server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides PORT / server.port)
        #[arg(long)]
        port: Option<u16>,
    },
}

impl App {
    /// Run the CLI application.
    pub async fn run(self) -> color_eyre::Result<()> {
        match self.command {
            Command::Init => self.run_init().await,
            Command::Serve { ref host, port } => self.run_serve(host.as_deref(), port).await,
        }
    }
}
