//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. Built-in defaults
//! 2. User config: `~/.config/userbase/config.toml` (XDG) or platform config dir
//! 3. Project config: `userbase.toml`
//! 4. Environment variables (`DB_TYPE`, `NEO4J_*`, `POSTGRES_*`, `MONGODB_*`, `COCKROACH_*`)
//!
//! # Intended Usage
//!
//! ```toml
//! backend = "cockroachdb"
//!
//! [server]
//! port = 3003
//!
//! [cockroach]
//! host = "crdb.internal"
//! database = "accounts"
//!
//! [cockroach.retry]
//! max_attempts = 5
//! base_delay_ms = 50
//! ```
//!
//! Only the section matching `backend` is used to open a connection; the
//! others keep their defaults.

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Uncased, UncasedStr},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Boxed wrapper for figment::Error to reduce Result size on the stack.
#[derive(Debug)]
pub struct ConfigError(Box<figment::Error>);

impl Deref for ConfigError {
    type Target = figment::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(Box::new(err))
    }
}

/// Storage engine backing the user repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Neo4j,
    Postgres,
    Mongodb,
    Cockroachdb,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Neo4j => "neo4j",
            Backend::Postgres => "postgres",
            Backend::Mongodb => "mongodb",
            Backend::Cockroachdb => "cockroachdb",
        };
        f.write_str(name)
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Selected storage engine.
    pub backend: Backend,
    pub server: ServerConfig,
    pub neo4j: Neo4jConfig,
    pub postgres: PostgresConfig,
    pub mongodb: MongoConfig,
    pub cockroach: CockroachConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Neo4j connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    /// Bolt URI, e.g. `neo4j://localhost:7687`.
    pub url: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            url: "neo4j://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "pass".to_string(),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "postgres".to_string(),
        }
    }
}

/// MongoDB connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// `host[:port]` list as it appears in a `mongodb://` URI.
    pub address: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            user: "mongodb".to_string(),
            password: "mongodb".to_string(),
            database: "userbase".to_string(),
        }
    }
}

impl MongoConfig {
    /// Connection string with credentials.
    pub fn uri(&self) -> String {
        format!(
            "mongodb://{}:{}@{}",
            self.user, self.password, self.address
        )
    }
}

/// CockroachDB connection and transaction retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CockroachConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub retry: RetryConfig,
}

impl Default for CockroachConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 26257,
            user: "admin".to_string(),
            password: "cockroach".to_string(),
            database: "postgres".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounds for the serialization-conflict retry loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds, doubled per failed attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Maps a recognised environment variable name to its dotted config key.
///
/// Unknown variables are ignored so the process environment does not leak
/// into the configuration.
pub fn env_key(name: &str) -> Option<String> {
    let name = name.to_ascii_uppercase();
    let key = match name.as_str() {
        "DB_TYPE" => "backend",
        "HOST" => "server.host",
        "PORT" => "server.port",

        "NEO4J_URL" => "neo4j.url",
        "NEO4J_USER" => "neo4j.user",
        "NEO4J_PASSWORD" => "neo4j.password",

        "POSTGRES_URL" => "postgres.host",
        "POSTGRES_PORT" => "postgres.port",
        "POSTGRES_USER" => "postgres.user",
        "POSTGRES_PASSWORD" => "postgres.password",
        "POSTGRES_DATABASE" => "postgres.database",

        "MONGODB_ADDRESS" => "mongodb.address",
        "MONGODB_USER" => "mongodb.user",
        "MONGODB_PASSWORD" => "mongodb.password",
        "MONGODB_DATABASE" => "mongodb.database",

        "COCKROACH_URL" => "cockroach.host",
        "COCKROACH_PORT" => "cockroach.port",
        "COCKROACH_USER" => "cockroach.user",
        "COCKROACH_PASSWORD" => "cockroach.password",
        "COCKROACH_DATABASE" => "cockroach.database",
        "COCKROACH_MAX_ATTEMPTS" => "cockroach.retry.max_attempts",
        "COCKROACH_RETRY_BASE_DELAY_MS" => "cockroach.retry.base_delay_ms",

        _ => return None,
    };
    Some(key.to_string())
}

impl Config {
    /// Load config with layered resolution (defaults → user → project → env).
    ///
    /// Extraction is lossy so numeric settings may arrive as strings.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract_lossy().map_err(ConfigError::from)
    }

    /// The layered provider chain backing [`Config::load`].
    pub fn figment() -> Figment {
        let figment = Figment::new()
            // Layer 1: User config (lowest priority)
            .merge(Toml::file(Self::user_config_path()))
            // Layer 2: Project config
            .merge(Toml::file("userbase.toml"));

        // Layer 3: Environment variables (highest priority)
        Self::env()
            .iter()
            .fold(figment, |figment, (key, value)| {
                figment.merge(Serialized::default(key.as_str(), value))
            })
    }

    /// Recognised environment variables, keyed by config path.
    ///
    /// Values are merged verbatim as strings rather than through `Env`'s own
    /// provider, which would turn a password like `0123` into the number 123.
    fn env() -> Env {
        Env::raw().filter_map(|name: &UncasedStr| env_key(name.as_str()).map(Uncased::from_owned))
    }

    /// User config path: ~/.config/userbase/config.toml (XDG) or platform config dir.
    fn user_config_path() -> std::path::PathBuf {
        // Prefer XDG config location (~/.config) on all platforms
        if let Some(home) = dirs::home_dir() {
            let xdg_path = home.join(".config").join("userbase").join("config.toml");
            if xdg_path.exists() {
                return xdg_path;
            }
        }
        dirs::config_dir()
            .map(|p| p.join("userbase").join("config.toml"))
            .unwrap_or_default()
    }
}
