//! Enrichment agents.
//!
//! Three LLM-backed analyses (context builder, classifier, sentiment) run
//! concurrently per message; the deterministic ranker combines their merged
//! output into the final priority. The draft and summarizer agents run on
//! demand. Every LLM-backed agent catches its own failures and produces a
//! rule-based fallback — agents never propagate errors.

pub mod classifier;
pub mod context;
pub mod draft;
pub mod ranker;
pub mod sentiment;
pub mod summarizer;

/// Interaction history for a sender, loaded from storage before the
/// pipeline fans out.
#[derive(Debug, Clone, Default)]
pub struct SenderHistory {
    /// Last interactions with this sender, newest first (capped at 20)
    pub interactions: Vec<String>,
    /// Messages counted as replied (is_read is the historical proxy)
    pub reply_count: u64,
    pub total_messages: u64,
    pub avg_reply_hours: f64,
}

/// Thread activity counters for the ranker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadActivity {
    pub message_count: u64,
    /// Messages in the thread within the last 24 hours
    pub recent_count: u64,
}
