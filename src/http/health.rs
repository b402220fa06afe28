use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::config::{Backend, Config};
use crate::repositories::AppUsers;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: Backend,
    /// Conflict retry bounds, reported only for the CockroachDB backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryBounds>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryBounds {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

/// GET /health
pub async fn health(
    State(users): State<AppUsers>,
    State(config): State<Arc<Config>>,
) -> Json<HealthResponse> {
    let backend = users.backend();
    let retry = (backend == Backend::Cockroachdb).then(|| RetryBounds {
        max_attempts: config.cockroach.retry.max_attempts,
        base_delay_ms: config.cockroach.retry.base_delay_ms,
    });

    Json(HealthResponse {
        status: "ok",
        backend,
        retry,
    })
}
