//! SeaORM entity models for Prism

pub mod contact;
pub mod message;
pub mod platform_credential;
pub mod sync_state;
pub mod user;
