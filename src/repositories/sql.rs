//! Statements and connection setup shared by the Postgres and CockroachDB
//! repositories.
//!
//! Both stores speak the Postgres wire protocol and keep users in the same
//! `users` table. Parameters carry explicit casts so the statements also work
//! against tables created with `SERIAL` and `TIMESTAMP` columns.

use chrono::Utc;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{GenericClient, NoTls};

use crate::error::AppError;
use crate::models::{NewUser, User};
use crate::repositories::codec::{self, Precision};

pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    username VARCHAR(255) NOT NULL,
    name VARCHAR(255) NOT NULL,
    surname VARCHAR(255) NOT NULL,
    password VARCHAR(255) NOT NULL,
    age INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const USER_COLUMNS: &str = "id, username, name, surname, age, password, created_at, updated_at";

const INSERT_USER: &str = r#"
INSERT INTO users (username, name, surname, age, password, created_at, updated_at)
VALUES ($1, $2, $3, $4::INT4, $5, $6::TIMESTAMPTZ, $6::TIMESTAMPTZ)
RETURNING id, username, name, surname, age, password, created_at, updated_at
"#;

const UPDATE_PASSWORD: &str = r#"
UPDATE users SET password = $2, updated_at = $3::TIMESTAMPTZ WHERE id = $1::INT8
"#;

/// Timestamp resolution of `TIMESTAMPTZ`.
pub const PRECISION: Precision = Precision::Micros;

/// Builds a pooled connection manager for a Postgres-protocol server.
pub fn connect_pool(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    database: &str,
) -> Result<Pool, AppError> {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(host)
        .port(port)
        .user(user)
        .password(password)
        .dbname(database);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    Pool::builder(mgr)
        .max_size(16)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create connection pool: {}", e)))
}

/// Creates the `users` table if it does not exist.
pub async fn ensure_users_table<C>(client: &C) -> Result<(), AppError>
where
    C: GenericClient + Sync,
{
    client.batch_execute(CREATE_USERS_TABLE).await?;
    Ok(())
}

/// Inserts a user with `created_at == updated_at` and returns the stored row.
pub async fn insert_user<C>(client: &C, input: &NewUser) -> Result<User, AppError>
where
    C: GenericClient + Sync,
{
    let now = PRECISION.now();
    let row = client
        .query_one(
            INSERT_USER,
            &[
                &input.username,
                &input.name,
                &input.surname,
                &input.age,
                &input.password,
                &now,
            ],
        )
        .await?;
    codec::user_from_row(&row)
}

/// Looks up a user by serial id, optionally taking a row lock.
pub async fn find_user<C>(client: &C, id: i64, for_update: bool) -> Result<Option<User>, AppError>
where
    C: GenericClient + Sync,
{
    let sql = format!(
        "SELECT {} FROM users WHERE id = $1::INT8{}",
        USER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    client
        .query_opt(sql.as_str(), &[&id])
        .await?
        .map(|row| codec::user_from_row(&row))
        .transpose()
}

/// Verifies the current password and stores the new one.
///
/// Must run inside a transaction: the read locks the row so the comparison
/// and the write see the same version.
pub async fn change_password<C>(
    client: &C,
    id: i64,
    current: &str,
    replacement: &str,
) -> Result<(), AppError>
where
    C: GenericClient + Sync,
{
    let user = find_user(client, id, true)
        .await?
        .ok_or_else(|| AppError::UserNotFound(id.to_string()))?;

    if user.password != current {
        return Err(AppError::PasswordMismatch(id.to_string()));
    }

    let updated_at = codec::next_updated_at(user.updated_at, Utc::now(), PRECISION);
    client
        .execute(UPDATE_PASSWORD, &[&id, &replacement, &updated_at])
        .await?;
    Ok(())
}
