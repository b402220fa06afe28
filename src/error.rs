//! Application error types with HTTP response conversion.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Legacy CockroachDB retryable error code, kept alongside `40001`.
const COCKROACH_RETRY_CODE: &str = "CR000";

/// Application-level errors for userbase.
#[derive(Error, Debug)]
pub enum AppError {
    // Domain errors
    #[error("User with id {0} not found")]
    UserNotFound(String),

    #[error("Password didn't match (userId: {0})")]
    PasswordMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Distributed SQL transaction errors
    #[error("Transaction aborted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Serialization conflict: {0}")]
    SerializationConflict(String),

    // Driver errors
    #[error("Neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Failed to decode user record: {0}")]
    Decode(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failed unit of work can be safely retried from scratch.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::SerializationConflict(_))
    }

    /// HTTP status the error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::UserNotFound(_) => StatusCode::NOT_FOUND,
            AppError::PasswordMismatch(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        let Some(db_err) = err.as_db_error() else {
            return AppError::Postgres(err);
        };

        let code = db_err.code();
        if *code == SqlState::T_R_SERIALIZATION_FAILURE || code.code() == COCKROACH_RETRY_CODE {
            AppError::SerializationConflict(format!(
                "{}: {} ({})",
                db_err.severity(),
                db_err.message(),
                code.code()
            ))
        } else {
            AppError::Postgres(err)
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::UserNotFound("1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::PasswordMismatch("1".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidInput("missing field".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::RetriesExhausted {
                attempts: 3,
                last_error: "conflict".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_only_serialization_conflicts_are_transient() {
        assert!(AppError::SerializationConflict("restart".into()).is_transient());
        assert!(!AppError::UserNotFound("1".into()).is_transient());
        assert!(!AppError::PasswordMismatch("1".into()).is_transient());
        assert!(!AppError::RetriesExhausted {
            attempts: 3,
            last_error: "restart".into()
        }
        .is_transient());
    }
}
