//! Neo4j user repository.
//!
//! Users are `:User` nodes addressed by their internal node id. Lookups go
//! through the driver's auto-commit path, which retries transient failures
//! on its own. Writes use explicit transactions and are not retried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Graph, Node, Query, Row, Txn};

use crate::config::{Backend, Neo4jConfig};
use crate::error::AppError;
use crate::models::{NewUser, PasswordUpdate, PasswordUpdated, User, UserId};
use crate::repositories::codec::{self, parse_serial_id, Precision};
use crate::repositories::UserRepository;

const PRECISION: Precision = Precision::Nanos;

/// Users stored as graph nodes.
#[derive(Clone)]
pub struct Neo4jUserRepository {
    graph: Arc<Graph>,
}

impl Neo4jUserRepository {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    pub async fn connect(config: &Neo4jConfig) -> Result<Self, AppError> {
        tracing::info!(url = %config.url, "Connecting to Neo4j");
        let graph = Graph::new(&config.url, &config.user, &config.password).await?;
        tracing::info!("Connected to Neo4j");
        Ok(Self::new(Arc::new(graph)))
    }

    fn user_from_row(row: &Row) -> Result<User, AppError> {
        let node: Node = row
            .get("user")
            .map_err(|e| AppError::Decode(format!("column 'user': {}", e)))?;
        codec::user_from_node(&node)
    }
}

/// Runs `q` in `txn` and returns its first row, draining the rest.
async fn fetch_first(txn: &mut Txn, q: Query) -> Result<Option<Row>, AppError> {
    let mut stream = txn.execute(q).await?;
    let first = stream.next(txn.handle()).await?;
    while stream.next(txn.handle()).await?.is_some() {}
    Ok(first)
}

async fn finish<T>(txn: Txn, result: Result<T, AppError>) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::warn!(error = %rollback_err, "Failed to roll back transaction");
            }
            Err(err)
        }
    }
}

async fn change_password(
    txn: &mut Txn,
    id: i64,
    update: &PasswordUpdate,
) -> Result<(), AppError> {
    // Writing a throwaway property takes the node's write lock before the
    // password is read, so concurrent changes queue here instead of both
    // reading the old password.
    let row = fetch_first(
        txn,
        query(
            "MATCH (user:User) WHERE ID(user) = $id
             SET user._lock = true REMOVE user._lock
             RETURN user",
        )
        .param("id", id),
    )
    .await?
    .ok_or_else(|| AppError::UserNotFound(id.to_string()))?;
    let user = Neo4jUserRepository::user_from_row(&row)?;

    if user.password != update.password {
        return Err(AppError::PasswordMismatch(id.to_string()));
    }

    let updated_at = codec::next_updated_at(user.updated_at, Utc::now(), PRECISION);
    let written = fetch_first(
        txn,
        query(
            "MATCH (user:User) WHERE ID(user) = $id AND user.password = $password
             SET user.password = $newPassword, user.updatedAt = $updatedAt
             RETURN user",
        )
        .param("id", id)
        .param("password", update.password.as_str())
        .param("newPassword", update.new_password.as_str())
        .param("updatedAt", updated_at.fixed_offset()),
    )
    .await?;

    // The guard only misses if the password changed between read and write.
    match written {
        Some(_) => Ok(()),
        None => Err(AppError::PasswordMismatch(id.to_string())),
    }
}

#[async_trait]
impl UserRepository for Neo4jUserRepository {
    fn backend(&self) -> Backend {
        Backend::Neo4j
    }

    async fn create(&self, input: NewUser) -> Result<User, AppError> {
        let now = PRECISION.now().fixed_offset();
        let q = query(
            "CREATE (user:User {
                username: $username,
                name: $name,
                surname: $surname,
                age: $age,
                password: $password,
                createdAt: $now,
                updatedAt: $now
             })
             RETURN user",
        )
        .param("username", input.username.as_str())
        .param("name", input.name.as_str())
        .param("surname", input.surname.as_str())
        .param("age", i64::from(input.age))
        .param("password", input.password.as_str())
        .param("now", now);

        let mut txn = self.graph.start_txn().await?;
        let result = match fetch_first(&mut txn, q).await {
            Ok(Some(row)) => Self::user_from_row(&row),
            Ok(None) => Err(AppError::Internal("CREATE returned no node".to_string())),
            Err(err) => Err(err),
        };
        let user = finish(txn, result).await?;

        tracing::debug!(id = %user.id, "Created user");
        Ok(user)
    }

    async fn get_by_id(&self, id: &str) -> Result<User, AppError> {
        let node_id = parse_serial_id(id)?;
        let mut result = self
            .graph
            .execute(
                query("MATCH (user:User) WHERE ID(user) = $id RETURN user").param("id", node_id),
            )
            .await?;

        let row = result
            .next()
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))?;
        Self::user_from_row(&row)
    }

    async fn update_password(
        &self,
        id: &str,
        update: PasswordUpdate,
    ) -> Result<PasswordUpdated, AppError> {
        let node_id = parse_serial_id(id)?;

        let mut txn = self.graph.start_txn().await?;
        let result = change_password(&mut txn, node_id, &update).await;
        finish(txn, result).await?;

        tracing::debug!(id = node_id, "Updated password");
        Ok(PasswordUpdated {
            id: UserId::Serial(node_id),
        })
    }
}
