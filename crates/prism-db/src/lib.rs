//! Prism database layer
//!
//! SeaORM entities and repositories for the Postgres store: messages,
//! contacts, platform credentials, sync states and users.

pub mod connection;
pub mod entities;
pub mod error;
pub mod repositories;

pub use connection::{establish_connection, DatabaseConnection};
pub use error::{DatabaseError, Result};
