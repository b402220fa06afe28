//! CockroachDB user repository.
//!
//! Same table and statements as the PostgreSQL repository, but every
//! operation runs as a [`UnitOfWork`] through the [`RetryCoordinator`] so
//! serialization conflicts are retried instead of surfacing as errors.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::{Backend, CockroachConfig};
use crate::error::AppError;
use crate::models::{NewUser, PasswordUpdate, PasswordUpdated, User, UserId};
use crate::repositories::codec::parse_serial_id;
use crate::repositories::retry::{RetryCoordinator, RetryPolicy, RetrySession, UnitOfWork};
use crate::repositories::{sql, UserRepository};

/// A pooled connection driven by the retry coordinator.
///
/// An abandoned session detaches its connection from the pool, so a
/// transaction left open by a cancelled request is closed with the socket
/// instead of being handed to the next caller.
struct CockroachSession {
    conn: Option<Object>,
}

impl CockroachSession {
    fn new(conn: Object) -> Self {
        Self { conn: Some(conn) }
    }

    fn client(&self) -> Result<&tokio_postgres::Client, AppError> {
        match &self.conn {
            Some(conn) => Ok(client(conn)),
            None => Err(AppError::Internal(
                "connection was detached from the pool".to_string(),
            )),
        }
    }

    async fn batch(&self, statement: &str) -> Result<(), AppError> {
        self.client()?.batch_execute(statement).await?;
        Ok(())
    }
}

#[async_trait]
impl RetrySession for CockroachSession {
    async fn begin(&mut self) -> Result<(), AppError> {
        self.batch("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        self.batch("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        self.batch("ROLLBACK").await
    }

    fn abandon(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(Object::take(conn));
        }
    }
}

fn client(conn: &Object) -> &tokio_postgres::Client {
    conn
}

struct InsertUser<'u>(&'u NewUser);

impl UnitOfWork<CockroachSession> for InsertUser<'_> {
    type Output = User;

    fn run<'a>(
        &'a self,
        session: &'a mut CockroachSession,
    ) -> BoxFuture<'a, Result<User, AppError>> {
        async move { sql::insert_user(session.client()?, self.0).await }.boxed()
    }
}

struct FindUser(i64);

impl UnitOfWork<CockroachSession> for FindUser {
    type Output = User;

    fn run<'a>(
        &'a self,
        session: &'a mut CockroachSession,
    ) -> BoxFuture<'a, Result<User, AppError>> {
        async move {
            sql::find_user(session.client()?, self.0, false)
                .await?
                .ok_or_else(|| AppError::UserNotFound(self.0.to_string()))
        }
        .boxed()
    }
}

struct ChangePassword<'u> {
    id: i64,
    update: &'u PasswordUpdate,
}

impl UnitOfWork<CockroachSession> for ChangePassword<'_> {
    type Output = ();

    fn run<'a>(&'a self, session: &'a mut CockroachSession) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            sql::change_password(
                session.client()?,
                self.id,
                &self.update.password,
                &self.update.new_password,
            )
            .await
        }
        .boxed()
    }
}

/// Users stored in a CockroachDB `users` table.
#[derive(Clone)]
pub struct CockroachUserRepository {
    pool: Pool,
    retry: RetryCoordinator,
}

impl CockroachUserRepository {
    pub fn new(pool: Pool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            retry: RetryCoordinator::new(policy),
        }
    }

    /// Builds the connection pool and retry policy. No connection is opened
    /// until first use.
    pub fn connect(config: &CockroachConfig) -> Result<Self, AppError> {
        let policy = RetryPolicy::from(&config.retry);
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_attempts = policy.max_attempts,
            "Using CockroachDB backend"
        );
        let pool = sql::connect_pool(
            &config.host,
            config.port,
            &config.user,
            &config.password,
            &config.database,
        )?;
        Ok(Self::new(pool, policy))
    }

    /// Creates the `users` table if needed.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        let conn = self.connection().await?;
        sql::ensure_users_table(client(&conn)).await?;
        tracing::info!("CockroachDB users table ready");
        Ok(())
    }

    async fn connection(&self) -> Result<Object, AppError> {
        Ok(self.pool.get().await?)
    }

    async fn run<W>(&self, work: &W) -> Result<W::Output, AppError>
    where
        W: UnitOfWork<CockroachSession>,
    {
        let mut session = CockroachSession::new(self.connection().await?);
        self.retry.execute(&mut session, work).await
    }
}

#[async_trait]
impl UserRepository for CockroachUserRepository {
    fn backend(&self) -> Backend {
        Backend::Cockroachdb
    }

    async fn create(&self, input: NewUser) -> Result<User, AppError> {
        let user = self.run(&InsertUser(&input)).await?;
        tracing::debug!(id = %user.id, "Created user");
        Ok(user)
    }

    async fn get_by_id(&self, id: &str) -> Result<User, AppError> {
        let serial = parse_serial_id(id)?;
        self.run(&FindUser(serial)).await
    }

    async fn update_password(
        &self,
        id: &str,
        update: PasswordUpdate,
    ) -> Result<PasswordUpdated, AppError> {
        let serial = parse_serial_id(id)?;
        self.run(&ChangePassword {
            id: serial,
            update: &update,
        })
        .await?;

        tracing::debug!(id = serial, "Updated password");
        Ok(PasswordUpdated {
            id: UserId::Serial(serial),
        })
    }
}
