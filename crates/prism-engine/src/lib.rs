//! Prism engine — the background half of the service.
//!
//! The enrichment pipeline fans one message out to three agents, merges
//! their output, ranks it, persists it and pushes it live. The sync
//! engine feeds the pipeline from periodic fleet polls and webhook
//! events. The scheduler drives the three periodic jobs under an
//! advisory-lock leadership gate.

pub mod pipeline;
pub mod scheduler;
pub mod sync;

pub use pipeline::EnrichmentPipeline;
pub use scheduler::{Scheduler, SchedulerIntervals};
pub use sync::SyncEngine;
