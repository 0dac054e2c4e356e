//! Platform adapters for Prism.
//!
//! One adapter per platform, all implementing the `prism-core` adapter
//! contract: fetch since a timestamp, normalize raw payloads into the
//! unified message schema, send replies, register webhooks, refresh
//! credentials. The registry is the only point that knows the concrete
//! set of supported platforms.

pub mod discord;
pub mod gmail;
pub mod registry;
pub mod signature;
pub mod slack;
pub mod telegram;

pub use registry::{AdapterRegistry, AdapterSettings};
