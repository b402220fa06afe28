//! User endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{NewUser, PasswordUpdate, PasswordUpdated, User};
use crate::repositories::AppUsers;

fn required<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::InvalidInput(format!("missing field `{}`", field)))
}

/// Body of `POST /user`.
///
/// Fields are optional so a missing one is reported by name instead of as a
/// generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    /// Ids are assigned by the store; a client-supplied one is rejected.
    pub id: Option<serde_json::Value>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub age: Option<i32>,
    pub password: Option<String>,
}

impl TryFrom<CreateUserRequest> for NewUser {
    type Error = AppError;

    fn try_from(req: CreateUserRequest) -> Result<Self, Self::Error> {
        if req.id.is_some() {
            return Err(AppError::InvalidInput(
                "id is assigned by the server".to_string(),
            ));
        }

        Ok(NewUser {
            username: required(req.username, "username")?,
            name: required(req.name, "name")?,
            surname: required(req.surname, "surname")?,
            age: required(req.age, "age")?,
            password: required(req.password, "password")?,
        })
    }
}

/// Body of `PUT|POST /user/:id/password`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub password: Option<String>,
    pub new_password: Option<String>,
}

impl TryFrom<UpdatePasswordRequest> for PasswordUpdate {
    type Error = AppError;

    fn try_from(req: UpdatePasswordRequest) -> Result<Self, Self::Error> {
        Ok(PasswordUpdate {
            password: required(req.password, "password")?,
            new_password: required(req.new_password, "newPassword")?,
        })
    }
}

/// POST /user
pub async fn create_user(
    State(users): State<AppUsers>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Json<User>, AppError> {
    let Json(req) = payload?;
    let input = NewUser::try_from(req)?;
    let user = users.create(input).await?;
    Ok(Json(user))
}

/// GET /user/:id
pub async fn get_user(
    State(users): State<AppUsers>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let user = users.get_by_id(&id).await?;
    Ok(Json(user))
}

/// PUT|POST /user/:id/password
pub async fn update_password(
    State(users): State<AppUsers>,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> Result<Json<PasswordUpdated>, AppError> {
    let Json(req) = payload?;
    let update = PasswordUpdate::try_from(req)?;
    let updated = users.update_password(&id, update).await?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: serde_json::Value) -> CreateUserRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_complete_request_converts() {
        let input = NewUser::try_from(request(json!({
            "username": "ada",
            "name": "Ada",
            "surname": "Lovelace",
            "age": 30,
            "password": "p1"
        })))
        .unwrap();

        assert_eq!(input.username, "ada");
        assert_eq!(input.age, 30);
    }

    #[test]
    fn test_missing_field_is_named() {
        let err = NewUser::try_from(request(json!({
            "username": "ada",
            "name": "Ada",
            "age": 30,
            "password": "p1"
        })))
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidInput(msg) if msg.contains("surname")));
    }

    #[test]
    fn test_client_supplied_id_is_rejected() {
        let err = NewUser::try_from(request(json!({
            "id": 5,
            "username": "ada",
            "name": "Ada",
            "surname": "Lovelace",
            "age": 30,
            "password": "p1"
        })))
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_password_request_requires_new_password() {
        let req: UpdatePasswordRequest =
            serde_json::from_value(json!({"password": "p1"})).unwrap();
        let err = PasswordUpdate::try_from(req).unwrap_err();

        assert!(matches!(err, AppError::InvalidInput(msg) if msg.contains("newPassword")));
    }
}
