//! HTTP surface over the user repository.
//!
//! Routes:
//! - `GET /health`
//! - `POST /user`
//! - `GET /user/:id`
//! - `PUT|POST /user/:id/password`

mod health;
mod user;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::context::Context;

pub use user::{CreateUserRequest, UpdatePasswordRequest};

/// Builds the application router.
pub fn router(ctx: Context) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/user", post(user::create_user))
        .route("/user/:id", get(user::get_user))
        .route(
            "/user/:id/password",
            post(user::update_password).put(user::update_password),
        )
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(ctx)
}
