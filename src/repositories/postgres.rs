//! PostgreSQL user repository.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool, Transaction};

use crate::config::{Backend, PostgresConfig};
use crate::error::AppError;
use crate::models::{NewUser, PasswordUpdate, PasswordUpdated, User, UserId};
use crate::repositories::codec::parse_serial_id;
use crate::repositories::{sql, UserRepository};

/// Users stored in a PostgreSQL `users` table.
///
/// Cheap to clone; the pool is shared.
#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: Pool,
}

impl PostgresUserRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Builds the connection pool. No connection is opened until first use.
    pub fn connect(config: &PostgresConfig) -> Result<Self, AppError> {
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Using PostgreSQL backend"
        );
        let pool = sql::connect_pool(
            &config.host,
            config.port,
            &config.user,
            &config.password,
            &config.database,
        )?;
        Ok(Self::new(pool))
    }

    /// Creates the `users` table if needed.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        let conn = self.connection().await?;
        sql::ensure_users_table(&**conn).await
    }

    async fn connection(&self) -> Result<Object, AppError> {
        Ok(self.pool.get().await?)
    }
}

/// Commits on success; otherwise rolls back and returns the operation error.
async fn finish<T>(tx: Transaction<'_>, result: Result<T, AppError>) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Failed to roll back transaction");
            }
            Err(err)
        }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn create(&self, input: NewUser) -> Result<User, AppError> {
        let mut conn = self.connection().await?;
        let tx = conn.transaction().await?;

        let result = sql::insert_user(&*tx, &input).await;
        let user = finish(tx, result).await?;

        tracing::debug!(id = %user.id, "Created user");
        Ok(user)
    }

    async fn get_by_id(&self, id: &str) -> Result<User, AppError> {
        let serial = parse_serial_id(id)?;
        let conn = self.connection().await?;

        sql::find_user(&**conn, serial, false)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    async fn update_password(
        &self,
        id: &str,
        update: PasswordUpdate,
    ) -> Result<PasswordUpdated, AppError> {
        let serial = parse_serial_id(id)?;
        let mut conn = self.connection().await?;
        let tx = conn.transaction().await?;

        let result =
            sql::change_password(&*tx, serial, &update.password, &update.new_password).await;
        finish(tx, result).await?;

        tracing::debug!(id = serial, "Updated password");
        Ok(PasswordUpdated {
            id: UserId::Serial(serial),
        })
    }
}
