//! Conversions between backend-native user records and [`User`].
//!
//! Every backend hands back users in its own shape: a Postgres row, a Neo4j
//! node, a BSON document. This module owns the mapping to the canonical
//! record, the native-id parsing rules, and the timestamp arithmetic that
//! keeps `updatedAt` strictly increasing at each store's precision.

use chrono::{DateTime, DurationRound, FixedOffset, TimeDelta, TimeZone, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};
use tokio_postgres::types::Type;

use crate::error::AppError;
use crate::models::{NewUser, User, UserId};

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Parses an external id for integer-keyed stores (node ids, serial columns).
///
/// Anything that is not exactly a base-10 `i64` (surrounding whitespace
/// included) cannot match a record, so it is reported as a missing user
/// rather than a client error.
pub fn parse_serial_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .map_err(|_| AppError::UserNotFound(raw.to_string()))
}

/// Parses an external id into a MongoDB object id.
pub fn parse_object_id(raw: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(raw).map_err(|_| AppError::UserNotFound(raw.to_string()))
}

// ----------------------------------------------------------------------------
// Timestamps
// ----------------------------------------------------------------------------

/// Finest timestamp resolution a store keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// BSON datetimes.
    Millis,
    /// Postgres / CockroachDB `TIMESTAMPTZ`.
    Micros,
    /// Neo4j temporal values.
    Nanos,
}

impl Precision {
    fn step(self) -> TimeDelta {
        match self {
            Precision::Millis => TimeDelta::milliseconds(1),
            Precision::Micros => TimeDelta::microseconds(1),
            Precision::Nanos => TimeDelta::nanoseconds(1),
        }
    }

    /// Truncates `ts` to what the store will persist.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(self.step()).unwrap_or(ts)
    }

    /// Current instant, already truncated.
    pub fn now(self) -> DateTime<Utc> {
        self.truncate(Utc::now())
    }
}

/// Computes the `updatedAt` value for a mutation.
///
/// Returns `now` truncated to `precision`, bumped by one step when the clock
/// has not moved past `previous` (same tick, or a clock step backwards).
pub fn next_updated_at(
    previous: DateTime<Utc>,
    now: DateTime<Utc>,
    precision: Precision,
) -> DateTime<Utc> {
    let now = precision.truncate(now);
    if now > previous {
        now
    } else {
        precision.truncate(previous) + precision.step()
    }
}

fn age_from_i64(age: i64) -> Result<i32, AppError> {
    i32::try_from(age).map_err(|_| AppError::Decode(format!("age out of range: {}", age)))
}

// ----------------------------------------------------------------------------
// Relational rows (Postgres, CockroachDB)
// ----------------------------------------------------------------------------

fn decode_err(column: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Decode(format!("column '{}': {}", column, err))
}

fn column_type<'r>(row: &'r tokio_postgres::Row, column: &str) -> Result<&'r Type, AppError> {
    row.columns()
        .iter()
        .find(|c| c.name() == column)
        .map(|c| c.type_())
        .ok_or_else(|| AppError::Decode(format!("column not found: {}", column)))
}

/// Reads an integer key stored as `INT2`, `INT4` or `INT8`.
///
/// `SERIAL` is `INT4` on Postgres and `INT8` on CockroachDB.
fn read_serial(row: &tokio_postgres::Row, column: &str) -> Result<i64, AppError> {
    let ty = column_type(row, column)?;
    let value = if *ty == Type::INT2 {
        row.try_get::<_, i16>(column).map(i64::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, i32>(column).map(i64::from)
    } else {
        row.try_get::<_, i64>(column)
    };
    value.map_err(|e| decode_err(column, e))
}

/// Reads `TIMESTAMPTZ`, or `TIMESTAMP` interpreted as UTC.
fn read_timestamp(row: &tokio_postgres::Row, column: &str) -> Result<DateTime<Utc>, AppError> {
    let value = if *column_type(row, column)? == Type::TIMESTAMP {
        row.try_get::<_, chrono::NaiveDateTime>(column)
            .map(|naive| naive.and_utc())
    } else {
        row.try_get::<_, DateTime<Utc>>(column)
    };
    value.map_err(|e| decode_err(column, e))
}

fn read_text(row: &tokio_postgres::Row, column: &str) -> Result<String, AppError> {
    row.try_get::<_, String>(column)
        .map_err(|e| decode_err(column, e))
}

/// Converts a `users` row into a [`User`].
pub fn user_from_row(row: &tokio_postgres::Row) -> Result<User, AppError> {
    let age = if *column_type(row, "age")? == Type::INT8 {
        let age = row
            .try_get::<_, i64>("age")
            .map_err(|e| decode_err("age", e))?;
        age_from_i64(age)?
    } else {
        row.try_get::<_, i32>("age")
            .map_err(|e| decode_err("age", e))?
    };

    Ok(User {
        id: UserId::Serial(read_serial(row, "id")?),
        username: read_text(row, "username")?,
        name: read_text(row, "name")?,
        surname: read_text(row, "surname")?,
        age,
        password: read_text(row, "password")?,
        created_at: read_timestamp(row, "created_at")?,
        updated_at: read_timestamp(row, "updated_at")?,
    })
}

// ----------------------------------------------------------------------------
// Graph nodes (Neo4j)
// ----------------------------------------------------------------------------

fn node_prop<T>(node: &neo4rs::Node, key: &str) -> Result<T, AppError>
where
    T: for<'de> Deserialize<'de>,
{
    node.get::<T>(key)
        .map_err(|e| AppError::Decode(format!("property '{}': {}", key, e)))
}

/// Converts a `:User` node into a [`User`].
pub fn user_from_node(node: &neo4rs::Node) -> Result<User, AppError> {
    let created_at: DateTime<FixedOffset> = node_prop(node, "createdAt")?;
    let updated_at: DateTime<FixedOffset> = node_prop(node, "updatedAt")?;

    Ok(User {
        id: UserId::Serial(node.id()),
        username: node_prop(node, "username")?,
        name: node_prop(node, "name")?,
        surname: node_prop(node, "surname")?,
        age: age_from_i64(node_prop(node, "age")?)?,
        password: node_prop(node, "password")?,
        created_at: created_at.with_timezone(&Utc),
        updated_at: updated_at.with_timezone(&Utc),
    })
}

// ----------------------------------------------------------------------------
// Documents (MongoDB)
// ----------------------------------------------------------------------------

/// Stored shape of a user in the `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub username: String,
    pub name: String,
    pub surname: String,
    pub age: i32,
    pub password: String,
    #[serde(rename = "createdAt")]
    pub created_at: bson::DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: bson::DateTime,
}

impl UserDocument {
    /// Builds a document for insertion; `_id` is left to the server.
    pub fn new(input: NewUser, now: DateTime<Utc>) -> Self {
        let now = to_bson_datetime(now);
        Self {
            id: None,
            username: input.username,
            name: input.name,
            surname: input.surname,
            age: input.age,
            password: input.password,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TryFrom<UserDocument> for User {
    type Error = AppError;

    fn try_from(doc: UserDocument) -> Result<Self, Self::Error> {
        let id = doc
            .id
            .ok_or_else(|| AppError::Decode("document has no _id".to_string()))?;

        Ok(User {
            id: UserId::Object(id.to_hex()),
            username: doc.username,
            name: doc.name,
            surname: doc.surname,
            age: doc.age,
            password: doc.password,
            created_at: from_bson_datetime(doc.created_at)?,
            updated_at: from_bson_datetime(doc.updated_at)?,
        })
    }
}

pub fn to_bson_datetime(ts: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(ts.timestamp_millis())
}

pub fn from_bson_datetime(ts: bson::DateTime) -> Result<DateTime<Utc>, AppError> {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .ok_or_else(|| AppError::Decode(format!("timestamp out of range: {}", ts)))
}
