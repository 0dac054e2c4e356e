//! Classifier agent — tags messages with a priority label and score.
//!
//! Uses the fast model tier to classify messages as
//! urgent | action | fyi | social | spam with a score in [0, 1].
//! Falls back to a weighted rule score when the provider fails.

use crate::llm::{clamp_unit, LlmClient, ModelTier};
use crate::message::{Classification, MessageState, PriorityLabel, RelationshipType};
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a message priority classifier.\nRespond with valid JSON only.";

const CONTENT_LIMIT: usize = 2000;

fn user_prompt(state: &MessageState) -> String {
    format!(
        "SENDER: {relationship} | reply rate: {reply_rate} | VIP: {is_vip}\n\
         PLATFORM: {platform}\n\
         TIME: {timestamp}\n\n\
         MESSAGE:\n{message}\n\n\
         LABELS:\n\
         - urgent: Requires response within hours, time-sensitive\n\
         - action: Requires response, not immediately critical\n\
         - fyi: Informational, no response needed\n\
         - social: Casual, low professional priority\n\
         - spam: Unsolicited, promotional, low value\n\n\
         SCORE GUIDE:\n\
         - 0.9-1.0: Urgent from VIP (investor, boss, client emergency)\n\
         - 0.7-0.89: Action from known contact\n\
         - 0.5-0.69: Action from stranger OR fyi from VIP\n\
         - 0.3-0.49: Social from known contact\n\
         - 0.0-0.29: Newsletter, bot, spam\n\n\
         Return JSON:\n\
         {{\n\
           \"label\": \"urgent|action|fyi|social|spam\",\n\
           \"priority_score\": 0.0,\n\
           \"time_sensitive\": true,\n\
           \"reasoning\": \"one sentence max\"\n\
         }}",
        relationship = state.sender.relationship.as_str(),
        reply_rate = state.sender.reply_rate,
        is_vip = state.sender.is_vip,
        platform = state.platform,
        timestamp = state.timestamp.to_rfc3339(),
        message = truncate(&state.content_text, CONTENT_LIMIT),
    )
}

/// Classify a message. Never fails — any provider or parse error produces
/// the rule-based fallback.
pub async fn classify(client: &LlmClient, state: &MessageState) -> Classification {
    match client
        .complete_json(ModelTier::Fast, SYSTEM_PROMPT, &user_prompt(state), 256)
        .await
    {
        Ok(result) => {
            let label = result
                .get("label")
                .and_then(|v| v.as_str())
                .and_then(PriorityLabel::from_str)
                .unwrap_or(PriorityLabel::Fyi);
            let score = clamp_unit(
                result
                    .get("priority_score")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
            );
            let classification = Classification {
                label,
                score,
                time_sensitive: result
                    .get("time_sensitive")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                reasoning: result
                    .get("reasoning")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            };
            info!(
                message_id = %state.id,
                label = classification.label.as_str(),
                score = classification.score,
                "classified message"
            );
            classification
        }
        Err(e) => {
            warn!(message_id = %state.id, error = %e, "classifier degraded to fallback");
            fallback_classify(state)
        }
    }
}

/// Rule-based fallback: relationship tier (30%) + urgency keyword hits
/// (5% each, capped at 20%) + reply rate (15%) + VIP boost (15%), with
/// keyword-based spam/social detection on the low-score residual.
pub fn fallback_classify(state: &MessageState) -> Classification {
    let content_lower = state.content_text.to_lowercase();

    let mut score = match state.sender.relationship {
        RelationshipType::Vip => 0.30,
        RelationshipType::CloseContact => 0.24,
        RelationshipType::WorkContact => 0.18,
        RelationshipType::Acquaintance => 0.12,
        RelationshipType::Stranger => 0.06,
        RelationshipType::Bot => 0.02,
        RelationshipType::Newsletter => 0.01,
    };

    let urgent_keywords = [
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
    ];
    let keyword_hits = urgent_keywords
        .iter()
        .filter(|kw| content_lower.contains(*kw))
        .count();
    score += (keyword_hits as f64 * 0.05).min(0.20);

    score += state.sender.reply_rate * 0.15;

    if state.sender.is_vip {
        score += 0.15;
    }

    let mut score = clamp_unit(score);

    let label = if score >= 0.85 {
        PriorityLabel::Urgent
    } else if score >= 0.60 {
        PriorityLabel::Action
    } else if score >= 0.30 {
        PriorityLabel::Fyi
    } else {
        let spam_keywords = ["unsubscribe", "click here", "limited time", "offer", "deal"];
        if spam_keywords.iter().any(|kw| content_lower.contains(kw)) {
            score = score.min(0.15);
            PriorityLabel::Spam
        } else {
            PriorityLabel::Social
        }
    };

    Classification {
        label,
        score: crate::agents::ranker::round3(score),
        time_sensitive: false,
        reasoning: "Classified using rule-based fallback".to_string(),
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmConfig;
    use crate::message::{Platform, SenderProfile};
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state_with(relationship: RelationshipType, is_vip: bool, reply_rate: f64, content: &str) -> MessageState {
        MessageState::new(
            Uuid::new_v4(),
            Platform::Gmail,
            "m1",
            "t1",
            SenderProfile {
                id: "s1".into(),
                name: "Sender".into(),
                relationship,
                is_vip,
                reply_rate,
                ..Default::default()
            },
            content,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_classify_parses_model_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "{\"label\":\"urgent\",\"priority_score\":1.7,\"time_sensitive\":true,\"reasoning\":\"production outage\"}" }],
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let state = state_with(RelationshipType::Vip, true, 0.9, "prod is down");
        let classification = classify(&client, &state).await;

        assert_eq!(classification.label, PriorityLabel::Urgent);
        // Out-of-range score is clamped
        assert_eq!(classification.score, 1.0);
        assert!(classification.time_sensitive);
        assert_eq!(classification.reasoning, "production outage");
    }

    #[tokio::test]
    async fn test_classify_falls_back_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let state = state_with(RelationshipType::WorkContact, false, 0.5, "can you review?");
        let classification = classify(&client, &state).await;

        assert!(classification.reasoning.contains("fallback"));
    }

    #[tokio::test]
    async fn test_classify_falls_back_on_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "sorry, I can't classify that" }],
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let state = state_with(RelationshipType::Stranger, false, 0.0, "hello");
        let classification = classify(&client, &state).await;

        assert!(classification.reasoning.contains("fallback"));
    }

    #[test]
    fn test_fallback_vip_with_keywords_scores_high() {
        let state = state_with(
            RelationshipType::Vip,
            true,
            1.0,
            "urgent deadline today, call me immediately",
        );
        let c = fallback_classify(&state);
        // 0.30 + 0.20 (capped keywords) + 0.15 + 0.15 = 0.80
        assert!((c.score - 0.80).abs() < 1e-9);
        assert_eq!(c.label, PriorityLabel::Action);
    }

    #[test]
    fn test_fallback_detects_spam_on_residual() {
        let state = state_with(
            RelationshipType::Newsletter,
            false,
            0.0,
            "Limited time offer! Click here to unsubscribe",
        );
        let c = fallback_classify(&state);
        assert_eq!(c.label, PriorityLabel::Spam);
        assert!(c.score <= 0.15);
    }

    #[test]
    fn test_fallback_social_without_spam_signals() {
        let state = state_with(RelationshipType::Stranger, false, 0.0, "nice weather today?");
        let c = fallback_classify(&state);
        assert!(matches!(c.label, PriorityLabel::Social | PriorityLabel::Fyi));
        assert_eq!(c.reasoning, "Classified using rule-based fallback");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(3000);
        assert_eq!(truncate(&text, 2000).chars().count(), 2000);
    }
}
