//! User persistence over interchangeable storage engines.
//!
//! The HTTP layer only sees [`UserRepository`]. One implementation is picked
//! at startup from [`Config::backend`] and shared as [`AppUsers`].

mod cockroach;
pub mod codec;
mod mongo;
mod neo4j;
mod postgres;
pub mod retry;
mod sql;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Backend, Config};
use crate::error::AppError;
use crate::models::{NewUser, PasswordUpdate, PasswordUpdated, User};

pub use cockroach::CockroachUserRepository;
pub use mongo::MongoUserRepository;
pub use neo4j::Neo4jUserRepository;
pub use postgres::PostgresUserRepository;
pub use retry::{RetryCoordinator, RetryPolicy, RetrySession, UnitOfWork};

/// Create, read and password-update operations on users.
///
/// Ids are taken in their external string form and parsed into the store's
/// native id type. An id that cannot be parsed is reported as
/// [`AppError::UserNotFound`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Engine behind this repository.
    fn backend(&self) -> Backend;

    /// Persists a new user. Both timestamps are set to the creation instant.
    async fn create(&self, input: NewUser) -> Result<User, AppError>;

    async fn get_by_id(&self, id: &str) -> Result<User, AppError>;

    /// Replaces the password if `update.password` matches the stored one,
    /// advancing `updatedAt`. The check and the write are atomic.
    async fn update_password(
        &self,
        id: &str,
        update: PasswordUpdate,
    ) -> Result<PasswordUpdated, AppError>;
}

/// Shared handle to the configured repository.
pub type AppUsers = Arc<dyn UserRepository>;

/// Builds the repository selected by `config.backend`.
///
/// CockroachDB provisions its `users` table here; the other engines are
/// provisioned by `init` or need no schema.
pub async fn connect(config: &Config) -> Result<AppUsers, AppError> {
    let users: AppUsers = match config.backend {
        Backend::Neo4j => Arc::new(Neo4jUserRepository::connect(&config.neo4j).await?),
        Backend::Postgres => Arc::new(PostgresUserRepository::connect(&config.postgres)?),
        Backend::Mongodb => Arc::new(MongoUserRepository::connect(&config.mongodb).await?),
        Backend::Cockroachdb => {
            let repo = CockroachUserRepository::connect(&config.cockroach)?;
            repo.ensure_schema().await?;
            Arc::new(repo)
        }
    };
    Ok(users)
}

/// Creates the `users` table for the SQL backends.
///
/// Returns `false` when the configured engine has no schema to provision.
pub async fn init_schema(config: &Config) -> Result<bool, AppError> {
    match config.backend {
        Backend::Postgres => {
            PostgresUserRepository::connect(&config.postgres)?
                .ensure_schema()
                .await?;
            Ok(true)
        }
        Backend::Cockroachdb => {
            CockroachUserRepository::connect(&config.cockroach)?
                .ensure_schema()
                .await?;
            Ok(true)
        }
        Backend::Neo4j | Backend::Mongodb => Ok(false),
    }
}
