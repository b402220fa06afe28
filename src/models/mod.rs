//! Domain models.

mod user;

pub use user::{NewUser, PasswordUpdate, PasswordUpdated, User, UserId};
