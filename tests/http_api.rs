//! HTTP API tests against an in-memory repository.
//!
//! No database is needed: the router is driven directly with
//! `tower::ServiceExt::oneshot`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use userbase::config::{Backend, Config};
use userbase::context::Context;
use userbase::error::AppError;
use userbase::http;
use userbase::models::{NewUser, PasswordUpdate, PasswordUpdated, User, UserId};
use userbase::repositories::codec::{next_updated_at, parse_serial_id, Precision};
use userbase::repositories::{AppUsers, UserRepository};

#[derive(Default)]
struct InMemoryUsers {
    users: Mutex<Vec<User>>,
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn create(&self, input: NewUser) -> Result<User, AppError> {
        let mut users = self.users.lock().unwrap();
        let now = Precision::Micros.now();
        let user = User {
            id: UserId::Serial(users.len() as i64 + 1),
            username: input.username,
            name: input.name,
            surname: input.surname,
            age: input.age,
            password: input.password,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: &str) -> Result<User, AppError> {
        let serial = parse_serial_id(id)?;
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == UserId::Serial(serial))
            .cloned()
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    async fn update_password(
        &self,
        id: &str,
        update: PasswordUpdate,
    ) -> Result<PasswordUpdated, AppError> {
        let serial = parse_serial_id(id)?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == UserId::Serial(serial))
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))?;

        if user.password != update.password {
            return Err(AppError::PasswordMismatch(id.to_string()));
        }
        user.password = update.new_password;
        user.updated_at = next_updated_at(user.updated_at, Utc::now(), Precision::Micros);

        Ok(PasswordUpdated {
            id: user.id.clone(),
        })
    }
}

/// Every operation fails as if the conflict retry budget ran out.
struct ContendedUsers;

#[async_trait]
impl UserRepository for ContendedUsers {
    fn backend(&self) -> Backend {
        Backend::Cockroachdb
    }

    async fn create(&self, _input: NewUser) -> Result<User, AppError> {
        Err(exhausted())
    }

    async fn get_by_id(&self, _id: &str) -> Result<User, AppError> {
        Err(exhausted())
    }

    async fn update_password(
        &self,
        _id: &str,
        _update: PasswordUpdate,
    ) -> Result<PasswordUpdated, AppError> {
        Err(exhausted())
    }
}

fn exhausted() -> AppError {
    AppError::RetriesExhausted {
        attempts: 3,
        last_error: "restart transaction".to_string(),
    }
}

fn app_with(users: AppUsers) -> Router {
    http::router(Context::new(users, Config::default()))
}

fn app() -> Router {
    app_with(Arc::new(InMemoryUsers::default()))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, method, uri, Some(&body.to_string())).await
}

fn ada() -> Value {
    json!({
        "username": "ada",
        "name": "Ada",
        "surname": "Lovelace",
        "age": 30,
        "password": "p1"
    })
}

#[tokio::test]
async fn test_health_reports_backend() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "backend": "postgres"}));
}

#[tokio::test]
async fn test_health_reports_configured_retry_bounds_for_cockroach() {
    let mut config = Config::default();
    config.cockroach.retry.max_attempts = 7;
    config.cockroach.retry.base_delay_ms = 25;
    let app = http::router(Context::new(Arc::new(ContendedUsers), config));

    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "ok",
            "backend": "cockroachdb",
            "retry": {"maxAttempts": 7, "baseDelayMs": 25}
        })
    );
}

#[tokio::test]
async fn test_create_echoes_input_with_equal_timestamps() {
    let app = app();
    let (status, user) = send_json(&app, Method::POST, "/user", ada()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["id"], json!(1));
    assert_eq!(user["username"], "ada");
    assert_eq!(user["name"], "Ada");
    assert_eq!(user["surname"], "Lovelace");
    assert_eq!(user["age"], 30);
    assert_eq!(user["password"], "p1");
    assert_eq!(user["createdAt"], user["updatedAt"]);
}

#[tokio::test]
async fn test_ada_scenario() {
    let app = app();

    let (status, created) = send_json(&app, Method::POST, "/user", ada()).await;
    assert_eq!(status, StatusCode::OK);
    let id = created["id"].to_string();

    let (status, fetched) = send(&app, Method::GET, &format!("/user/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, updated) = send_json(
        &app,
        Method::PUT,
        &format!("/user/{}/password", id),
        json!({"password": "p1", "newPassword": "p2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated, json!({"id": created["id"]}));

    let (status, after) = send(&app, Method::GET, &format!("/user/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["password"], "p2");
    assert_eq!(after["createdAt"], created["createdAt"]);
    assert_ne!(after["updatedAt"], created["updatedAt"]);
}

#[tokio::test]
async fn test_password_update_accepts_post() {
    let app = app();
    send_json(&app, Method::POST, "/user", ada()).await;

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/user/1/password",
        json!({"password": "p1", "newPassword": "p2"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": 1}));
}

#[tokio::test]
async fn test_unknown_user_is_404() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/user/42", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("42"));
}

#[tokio::test]
async fn test_malformed_id_is_404() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/user/not-a-number", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.get("error").is_some());
}

#[tokio::test]
async fn test_padded_id_is_404() {
    let app = app();
    send_json(&app, Method::POST, "/user", ada()).await;

    let (status, _) = send(&app, Method::GET, "/user/%201", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(
        &app,
        Method::PUT,
        "/user/1%20/password",
        json!({"password": "p1", "newPassword": "p2"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, user) = send(&app, Method::GET, "/user/1", None).await;
    assert_eq!(user["password"], "p1");
}

#[tokio::test]
async fn test_wrong_password_is_400_and_keeps_password() {
    let app = app();
    send_json(&app, Method::POST, "/user", ada()).await;

    let (status, body) = send_json(
        &app,
        Method::PUT,
        "/user/1/password",
        json!({"password": "wrong", "newPassword": "p2"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("didn't match"));

    let (_, user) = send(&app, Method::GET, "/user/1", None).await;
    assert_eq!(user["password"], "p1");
}

#[tokio::test]
async fn test_password_update_on_missing_user_is_404() {
    let app = app();
    let (status, _) = send_json(
        &app,
        Method::PUT,
        "/user/9/password",
        json!({"password": "p1", "newPassword": "p2"}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_create_bodies_are_400() {
    let app = app();

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/user",
        json!({"username": "ada", "name": "Ada", "age": 30, "password": "p1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("surname"));

    let mut with_id = ada();
    with_id["id"] = json!(7);
    let (status, _) = send_json(&app, Method::POST, "/user", with_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::POST, "/user", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("error").is_some());

    let mut bad_age = ada();
    bad_age["age"] = json!("thirty");
    let (status, _) = send_json(&app, Method::POST, "/user", bad_age).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exhausted_retries_are_500() {
    let app = app_with(Arc::new(ContendedUsers));

    let (status, body) = send_json(
        &app,
        Method::PUT,
        "/user/1/password",
        json!({"password": "p1", "newPassword": "p2"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("3 attempts"));
}
