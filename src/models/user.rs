//! User model shared by every storage backend.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical user identifier.
///
/// Each backend assigns its own native identifier: an integer for node ids
/// and serial columns, a 24-character hex object id for documents. The JSON
/// form keeps that distinction (number vs. string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    /// Graph node id or SQL serial.
    Serial(i64),
    /// Document object id, hex encoded.
    Object(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Serial(id) => write!(f, "{}", id),
            UserId::Object(hex) => f.write_str(hex),
        }
    }
}

/// A persisted user account.
///
/// Passwords are stored and compared in plaintext, matching the data
/// already held by the existing stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub surname: String,
    pub age: i32,
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a user. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub surname: String,
    pub age: i32,
    pub password: String,
}

/// Current and replacement password for a password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordUpdate {
    /// Password currently stored for the user.
    pub password: String,
    pub new_password: String,
}

/// Result of a successful password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordUpdated {
    pub id: UserId,
}
