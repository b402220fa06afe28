//! Userbase - user account service
//!
//! Create, read and password-update operations on users, served over HTTP
//! and backed by Neo4j, PostgreSQL, MongoDB or CockroachDB.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod models;
pub mod repositories;
