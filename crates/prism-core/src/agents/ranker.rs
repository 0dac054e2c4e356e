//! Deterministic priority ranker.
//!
//! Runs after the enrichment agents and combines their merged output with
//! a weighted formula:
//!
//!   sender relationship 30% | urgency keywords 20% | time sensitivity 15%
//!   historical reply rate 15% | thread activity 10% | sentiment 10%
//!
//! No LLM call — the same inputs always produce the same score.

use crate::agents::ThreadActivity;
use crate::message::{MessageState, PriorityLabel, RelationshipType, Sentiment};
use chrono::{DateTime, Utc};
use tracing::info;

const WEIGHT_RELATIONSHIP: f64 = 0.30;
const WEIGHT_URGENCY: f64 = 0.20;
const WEIGHT_TIME: f64 = 0.15;
const WEIGHT_REPLY_RATE: f64 = 0.15;
const WEIGHT_THREAD: f64 = 0.10;
const WEIGHT_SENTIMENT: f64 = 0.10;

/// Messages from VIP senders never rank below this score.
pub const VIP_FLOOR: f64 = 0.60;

const URGENCY_KEYWORDS: &[&str] = &[
    "asap",
    "urgent",
    "deadline",
    "today",
    "help",
    "call me",
    "immediately",
    "critical",
    "emergency",
    "important",
    "breaking",
    "time-sensitive",
    "overdue",
    "expires",
    "final notice",
];

/// Final score and label produced by the ranker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedPriority {
    pub score: f64,
    pub label: PriorityLabel,
}

fn relationship_signal(relationship: RelationshipType) -> f64 {
    match relationship {
        RelationshipType::Vip => 1.0,
        RelationshipType::CloseContact => 0.8,
        RelationshipType::WorkContact => 0.65,
        RelationshipType::Acquaintance => 0.4,
        RelationshipType::Stranger => 0.2,
        RelationshipType::Bot => 0.05,
        RelationshipType::Newsletter => 0.02,
    }
}

fn sentiment_signal(sentiment: Sentiment) -> f64 {
    match sentiment {
        Sentiment::Distressed => 1.0,
        Sentiment::Urgent => 0.9,
        Sentiment::Tense => 0.7,
        Sentiment::Neutral => 0.3,
        Sentiment::Positive => 0.2,
    }
}

fn urgency_signal(content: &str) -> f64 {
    let lower = content.to_lowercase();
    let hits = URGENCY_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    (hits as f64 * 0.25).min(1.0)
}

/// Time decay: fresh messages (< 1h) get full score, linear decay towards
/// 48h, then a flat tail.
fn time_signal(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - timestamp).num_seconds() as f64 / 3600.0;
    if age_hours < 1.0 {
        1.0
    } else if age_hours < 24.0 {
        1.0 - age_hours / 48.0
    } else if age_hours < 48.0 {
        (1.0 - age_hours / 48.0).max(0.1)
    } else {
        0.05
    }
}

fn thread_signal(thread: ThreadActivity) -> f64 {
    if thread.message_count > 1 {
        let activity =
            (thread.recent_count as f64 / thread.message_count.max(1) as f64).min(1.0);
        activity.max(0.3)
    } else {
        0.1
    }
}

/// Compute the final weighted priority for a fully enriched message.
pub fn rank(state: &MessageState, thread: ThreadActivity, now: DateTime<Utc>) -> RankedPriority {
    let relationship = relationship_signal(state.sender.relationship);
    let urgency = urgency_signal(&state.content_text);
    let time = time_signal(state.timestamp, now);
    let reply_rate = state.sender.reply_rate;
    let thread_activity = thread_signal(thread);
    let sentiment = sentiment_signal(state.enrichment.sentiment);

    let mut score = relationship * WEIGHT_RELATIONSHIP
        + urgency * WEIGHT_URGENCY
        + time * WEIGHT_TIME
        + reply_rate * WEIGHT_REPLY_RATE
        + thread_activity * WEIGHT_THREAD
        + sentiment * WEIGHT_SENTIMENT;

    if state.sender.is_vip {
        score = score.max(VIP_FLOOR);
    }

    let score = round3(score.clamp(0.0, 1.0));
    let label = label_for(score, state.enrichment.priority_label);

    info!(
        message_id = %state.id,
        score,
        label = label.as_str(),
        relationship,
        urgency,
        time,
        reply_rate,
        thread_activity,
        sentiment,
        "priority ranked"
    );

    RankedPriority { score, label }
}

/// Select the final label from score thresholds, preserving the
/// classifier's spam/social verdict on low-scoring messages.
fn label_for(score: f64, classifier_label: PriorityLabel) -> PriorityLabel {
    if score >= 0.85 {
        PriorityLabel::Urgent
    } else if score >= 0.60 {
        PriorityLabel::Action
    } else if score >= 0.30 {
        PriorityLabel::Fyi
    } else if matches!(classifier_label, PriorityLabel::Spam | PriorityLabel::Social) {
        classifier_label
    } else {
        PriorityLabel::Social
    }
}

/// Decay factor applied by the hourly score-decay job: 5% per 12 hours past
/// the first 24, floored at 0.3.
pub fn decay_factor(age_hours: f64) -> f64 {
    let decay_periods = (age_hours - 24.0) / 12.0;
    (1.0 - decay_periods * 0.05).max(0.3)
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
