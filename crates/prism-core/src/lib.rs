//! Prism core — domain model, enrichment agents and shared infrastructure.
//!
//! This crate holds everything the rest of the workspace builds on:
//! the unified message schema, the error taxonomy, the LLM-backed
//! enrichment agents and the deterministic priority ranker, the platform
//! adapter contract, and the Redis/WebSocket/vector-store plumbing.

pub mod adapter;
pub mod agents;
pub mod auth;
pub mod cache;
pub mod crypto;
pub mod errors;
pub mod llm;
pub mod message;
pub mod pubsub;
pub mod vector;
pub mod websocket;

pub use errors::{CoreError, CoreResult};
pub use message::{
    Enrichment, MessageState, Platform, PriorityLabel, RelationshipType, SenderProfile, Sentiment,
};
