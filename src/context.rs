//! Application state shared by the HTTP handlers.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{self, AppUsers};

/// Root application state.
///
/// Each field is extractable on its own via `State<T>` thanks to the
/// `FromRef` derive.
#[derive(Clone, FromRef)]
pub struct Context {
    /// Repository for the configured backend.
    pub users: AppUsers,
    /// Application configuration.
    pub config: Arc<Config>,
}

impl Context {
    pub fn new(users: AppUsers, config: Config) -> Self {
        Self {
            users,
            config: Arc::new(config),
        }
    }

    /// Connects the backend selected in `config` and builds the context.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        let users = repositories::connect(&config).await?;
        Ok(Self::new(users, config))
    }
}
