//! The unified message schema that flows through the entire pipeline.
//!
//! Adapters produce a `MessageState`, the enrichment agents each return a
//! partial record, and the pipeline merges those records onto the state
//! after the join barrier before handing it to the ranker. Keeping agent
//! output in separate records means a failed agent can never clobber
//! fields another agent produced.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported communication platforms.
///
/// `Whatsapp` exists in the domain (it has a tone profile) but no adapter
/// is registered for it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Gmail,
    Slack,
    Telegram,
    Discord,
    Whatsapp,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Slack => "slack",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Whatsapp => "whatsapp",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gmail" => Some(Self::Gmail),
            "slack" => Some(Self::Slack),
            "telegram" => Some(Self::Telegram),
            "discord" => Some(Self::Discord),
            "whatsapp" => Some(Self::Whatsapp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship tiers assigned by the context builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Vip,
    CloseContact,
    WorkContact,
    Acquaintance,
    #[default]
    Stranger,
    Bot,
    Newsletter,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vip => "vip",
            Self::CloseContact => "close_contact",
            Self::WorkContact => "work_contact",
            Self::Acquaintance => "acquaintance",
            Self::Stranger => "stranger",
            Self::Bot => "bot",
            Self::Newsletter => "newsletter",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "vip" => Some(Self::Vip),
            "close_contact" => Some(Self::CloseContact),
            "work_contact" => Some(Self::WorkContact),
            "acquaintance" => Some(Self::Acquaintance),
            "stranger" => Some(Self::Stranger),
            "bot" => Some(Self::Bot),
            "newsletter" => Some(Self::Newsletter),
            _ => None,
        }
    }
}

/// Priority labels assigned by the classifier and finalized by the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLabel {
    Urgent,
    Action,
    #[default]
    Fyi,
    Social,
    Spam,
}

impl PriorityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Action => "action",
            Self::Fyi => "fyi",
            Self::Social => "social",
            Self::Spam => "spam",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(Self::Urgent),
            "action" => Some(Self::Action),
            "fyi" => Some(Self::Fyi),
            "social" => Some(Self::Social),
            "spam" => Some(Self::Spam),
            _ => None,
        }
    }

    /// Score assigned when a user manually reclassifies a message.
    pub fn override_score(&self) -> f64 {
        match self {
            Self::Urgent => 0.90,
            Self::Action => 0.70,
            Self::Fyi => 0.45,
            Self::Social => 0.25,
            Self::Spam => 0.10,
        }
    }
}

/// Emotional tone detected by the sentiment agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Tense,
    Urgent,
    Distressed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Tense => "tense",
            Self::Urgent => "urgent",
            Self::Distressed => "distressed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "tense" => Some(Self::Tense),
            "urgent" => Some(Self::Urgent),
            "distressed" => Some(Self::Distressed),
            _ => None,
        }
    }
}

/// Sender information, enriched by the context builder agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SenderProfile {
    /// Stable identifier on the originating platform
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub relationship: RelationshipType,
    pub is_vip: bool,
    /// Historical reply rate in [0, 1]
    pub reply_rate: f64,
    pub context_summary: String,
}

/// AI-derived fields attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub priority_score: f64,
    pub priority_label: PriorityLabel,
    pub sentiment: Sentiment,
    pub summary: String,
    /// Shown in the UI as "why this priority"
    pub context_note: String,
    pub suggested_actions: Vec<String>,
    pub is_complaint: bool,
    pub needs_careful_response: bool,
    pub suggested_approach: String,
    pub time_sensitive: bool,
    pub classification_reasoning: String,
}

impl Default for Enrichment {
    fn default() -> Self {
        Self {
            priority_score: 0.0,
            priority_label: PriorityLabel::Fyi,
            sentiment: Sentiment::Neutral,
            summary: String::new(),
            context_note: String::new(),
            suggested_actions: Vec::new(),
            is_complaint: false,
            needs_careful_response: false,
            suggested_approach: String::new(),
            time_sensitive: false,
            classification_reasoning: String::new(),
        }
    }
}

/// The unit that flows through the pipeline and lands in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageState {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: Platform,
    pub platform_message_id: String,
    pub thread_id: String,
    pub sender: SenderProfile,
    pub content_text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub is_done: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub enrichment: Enrichment,
    pub draft_reply: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageState {
    /// Create a fresh state for a newly ingested platform message.
    pub fn new(
        user_id: Uuid,
        platform: Platform,
        platform_message_id: impl Into<String>,
        thread_id: impl Into<String>,
        sender: SenderProfile,
        content_text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            platform,
            platform_message_id: platform_message_id.into(),
            thread_id: thread_id.into(),
            sender,
            content_text: content_text.into(),
            timestamp,
            is_read: false,
            is_done: false,
            snoozed_until: None,
            enrichment: Enrichment::default(),
            draft_reply: None,
            created_at: None,
        }
    }

    /// Fold the context builder's output into the state.
    pub fn apply_assessment(&mut self, assessment: SenderAssessment) {
        self.sender.relationship = assessment.relationship;
        self.sender.is_vip = assessment.is_vip;
        self.sender.reply_rate = assessment.reply_rate;
        self.sender.context_summary = assessment.context_summary.clone();
        if !assessment.context_summary.is_empty() {
            self.enrichment.context_note = assessment.context_summary;
        }
    }

    /// Fold the classifier's output into the state.
    pub fn apply_classification(&mut self, classification: Classification) {
        self.enrichment.priority_label = classification.label;
        self.enrichment.priority_score = classification.score;
        self.enrichment.time_sensitive = classification.time_sensitive;
        self.enrichment.classification_reasoning = classification.reasoning.clone();
        if !classification.reasoning.is_empty() {
            if self.enrichment.context_note.is_empty() {
                self.enrichment.context_note = classification.reasoning;
            } else {
                self.enrichment.context_note =
                    format!("{} | {}", self.enrichment.context_note, classification.reasoning);
            }
        }
    }

    /// Fold the sentiment agent's output into the state.
    pub fn apply_sentiment(&mut self, reading: SentimentReading) {
        self.enrichment.sentiment = reading.sentiment;
        self.enrichment.is_complaint = reading.is_complaint;
        self.enrichment.needs_careful_response = reading.needs_careful_response;
        self.enrichment.suggested_approach = reading.suggested_approach;
    }
}

/// Context builder output — relationship intelligence for the sender.
#[derive(Debug, Clone, Default)]
pub struct SenderAssessment {
    pub relationship: RelationshipType,
    pub is_vip: bool,
    pub reply_rate: f64,
    pub context_summary: String,
}

/// Classifier output.
#[derive(Debug, Clone)]
pub struct Classification {
    pub label: PriorityLabel,
    pub score: f64,
    pub time_sensitive: bool,
    pub reasoning: String,
}

/// Sentiment agent output.
#[derive(Debug, Clone, Default)]
pub struct SentimentReading {
    pub sentiment: Sentiment,
    pub is_complaint: bool,
    pub needs_careful_response: bool,
    pub suggested_approach: String,
}

/// Parse a platform timestamp, accepting RFC 3339 / ISO 8601 strings and
/// epoch seconds. Anything unparseable defaults to now.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return dt.with_timezone(&Utc);
    }
    // Naive ISO without offset — treat as UTC
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Utc.from_utc_datetime(&naive);
    }
    // Epoch seconds, optionally fractional (Slack-style "1714000000.000200")
    if let Ok(epoch) = trimmed
        .split('.')
        .next()
        .unwrap_or_default()
        .parse::<i64>()
    {
        if let Some(dt) = Utc.timestamp_opt(epoch, 0).single() {
            return dt;
        }
    }

    Utc::now()
}

/// Parse a timestamp from epoch seconds, defaulting to now when out of range.
pub fn timestamp_from_epoch(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        for p in [
            Platform::Gmail,
            Platform::Slack,
            Platform::Telegram,
            Platform::Discord,
            Platform::Whatsapp,
        ] {
            assert_eq!(Platform::from_str(p.as_str()), Some(p));
        }
        assert_eq!(Platform::from_str("irc"), None);
    }

    #[test]
    fn test_enum_serde_uses_snake_case() {
        let json = serde_json::to_string(&RelationshipType::CloseContact).unwrap();
        assert_eq!(json, "\"close_contact\"");
        let label: PriorityLabel = serde_json::from_str("\"urgent\"").unwrap();
        assert_eq!(label, PriorityLabel::Urgent);
    }

    #[test]
    fn test_override_score_map() {
        assert_eq!(PriorityLabel::Urgent.override_score(), 0.90);
        assert_eq!(PriorityLabel::Action.override_score(), 0.70);
        assert_eq!(PriorityLabel::Fyi.override_score(), 0.45);
        assert_eq!(PriorityLabel::Social.override_score(), 0.25);
        assert_eq!(PriorityLabel::Spam.override_score(), 0.10);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let iso = parse_timestamp("2024-05-01T10:30:00Z");
        assert_eq!(iso.to_rfc3339(), "2024-05-01T10:30:00+00:00");

        let offset = parse_timestamp("2024-05-01T10:30:00+02:00");
        assert_eq!(offset.to_rfc3339(), "2024-05-01T08:30:00+00:00");

        let naive = parse_timestamp("2024-05-01T10:30:00");
        assert_eq!(naive.to_rfc3339(), "2024-05-01T10:30:00+00:00");

        let slack = parse_timestamp("1714559400.000200");
        assert_eq!(slack.timestamp(), 1_714_559_400);
    }

    #[test]
    fn test_parse_timestamp_garbage_defaults_to_now() {
        let before = Utc::now();
        let parsed = parse_timestamp("not-a-date");
        assert!(parsed >= before);
    }

    #[test]
    fn test_merge_is_field_scoped() {
        let mut state = MessageState::new(
            Uuid::new_v4(),
            Platform::Slack,
            "1714559400.000200",
            "C123",
            SenderProfile {
                id: "U42".into(),
                name: "Dana".into(),
                ..Default::default()
            },
            "need this asap",
            Utc::now(),
        );

        state.apply_sentiment(SentimentReading {
            sentiment: Sentiment::Urgent,
            needs_careful_response: true,
            ..Default::default()
        });
        state.apply_classification(Classification {
            label: PriorityLabel::Action,
            score: 0.7,
            time_sensitive: true,
            reasoning: "direct request".into(),
        });

        // Classifier output must not touch the sentiment fields
        assert_eq!(state.enrichment.sentiment, Sentiment::Urgent);
        assert!(state.enrichment.needs_careful_response);
        assert_eq!(state.enrichment.priority_label, PriorityLabel::Action);
    }

    #[test]
    fn test_context_note_accumulates() {
        let mut state = MessageState::new(
            Uuid::new_v4(),
            Platform::Gmail,
            "m1",
            "t1",
            SenderProfile::default(),
            "hello",
            Utc::now(),
        );

        state.apply_assessment(SenderAssessment {
            relationship: RelationshipType::WorkContact,
            context_summary: "Colleague from the data team".into(),
            ..Default::default()
        });
        state.apply_classification(Classification {
            label: PriorityLabel::Fyi,
            score: 0.4,
            time_sensitive: false,
            reasoning: "status update, no ask".into(),
        });

        assert_eq!(
            state.enrichment.context_note,
            "Colleague from the data team | status update, no ask"
        );
    }
}
