//! Persistence collaborators of the hub.
//!
//! The hub only sees the `MessageStore` and `UserDirectory` traits;
//! `DbOperations` is the Postgres implementation of both.

pub mod models;
pub mod operations;
pub mod store;

pub use models::{KnownUser, StoredMessage};
pub use operations::DbOperations;
pub use store::{MessageStore, UserDirectory};
