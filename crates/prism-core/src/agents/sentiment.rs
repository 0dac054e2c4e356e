//! Sentiment agent — detects emotional tone in messages.
//!
//! Flags tense/distressed messages so the draft agent can approach them
//! with care. Falls back to keyword bags when the provider fails.

use crate::llm::{LlmClient, ModelTier};
use crate::message::{MessageState, Sentiment, SentimentReading};
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You detect emotional tone in messages to help users approach\n\
sensitive conversations appropriately.\n\
Respond with JSON only.";

const CONTENT_LIMIT: usize = 2000;

fn user_prompt(state: &MessageState) -> String {
    let content: String = state.content_text.chars().take(CONTENT_LIMIT).collect();
    format!(
        "MESSAGE: {content}\n\
         SENDER: {name} ({relationship})\n\
         PLATFORM: {platform}\n\n\
         Tone options:\n\
         - positive: Warm, appreciative, excited\n\
         - neutral: Factual, professional, routine\n\
         - tense: Frustrated, disappointed, formal complaint\n\
         - urgent: Panicked, overwhelmed, needs immediate help\n\
         - distressed: Significant distress or crisis signals\n\n\
         Return JSON:\n\
         {{\n\
           \"sentiment\": \"positive|neutral|tense|urgent|distressed\",\n\
           \"is_complaint\": false,\n\
           \"needs_careful_response\": false,\n\
           \"suggested_approach\": \"one sentence on how to reply\"\n\
         }}",
        name = state.sender.name,
        relationship = state.sender.relationship.as_str(),
        platform = state.platform,
    )
}

/// Detect emotional tone. Never fails — any provider or parse error
/// produces the keyword-based fallback.
pub async fn detect_sentiment(client: &LlmClient, state: &MessageState) -> SentimentReading {
    match client
        .complete_json(ModelTier::Fast, SYSTEM_PROMPT, &user_prompt(state), 256)
        .await
    {
        Ok(result) => {
            let reading = SentimentReading {
                sentiment: result
                    .get("sentiment")
                    .and_then(|v| v.as_str())
                    .and_then(Sentiment::from_str)
                    .unwrap_or(Sentiment::Neutral),
                is_complaint: result
                    .get("is_complaint")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                needs_careful_response: result
                    .get("needs_careful_response")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                suggested_approach: result
                    .get("suggested_approach")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            };
            info!(
                message_id = %state.id,
                sentiment = reading.sentiment.as_str(),
                careful = reading.needs_careful_response,
                "sentiment detected"
            );
            reading
        }
        Err(e) => {
            warn!(message_id = %state.id, error = %e, "sentiment agent degraded to fallback");
            fallback_sentiment(state)
        }
    }
}

/// Keyword-bag fallback, checked in severity order.
pub fn fallback_sentiment(state: &MessageState) -> SentimentReading {
    let content_lower = state.content_text.to_lowercase();

    let distressed = [
        "please help",
        "emergency",
        "crisis",
        "can't take",
        "desperate",
        "struggling",
        "worried sick",
        "help",
    ];
    let urgent = [
        "asap",
        "immediately",
        "right now",
        "can't wait",
        "time is running out",
    ];
    let tense = [
        "disappointed",
        "frustrated",
        "unacceptable",
        "complaint",
        "not happy",
        "terrible",
        "worst",
        "angry",
        "furious",
    ];
    let positive = [
        "thank you",
        "thanks",
        "great",
        "awesome",
        "love",
        "appreciate",
        "excellent",
        "wonderful",
        "happy",
    ];

    let contains_any = |bag: &[&str]| bag.iter().any(|kw| content_lower.contains(kw));

    if contains_any(&distressed) {
        SentimentReading {
            sentiment: Sentiment::Distressed,
            is_complaint: false,
            needs_careful_response: true,
            suggested_approach: "Respond with empathy and offer concrete help".to_string(),
        }
    } else if contains_any(&urgent) {
        SentimentReading {
            sentiment: Sentiment::Urgent,
            is_complaint: false,
            needs_careful_response: true,
            suggested_approach: "Respond quickly and directly".to_string(),
        }
    } else if contains_any(&tense) {
        SentimentReading {
            sentiment: Sentiment::Tense,
            is_complaint: true,
            needs_careful_response: true,
            suggested_approach: "Acknowledge their concern before addressing the issue".to_string(),
        }
    } else if contains_any(&positive) {
        SentimentReading {
            sentiment: Sentiment::Positive,
            ..Default::default()
        }
    } else {
        SentimentReading::default()
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

    fn state(content: &str) -> MessageState {
        MessageState::new(
            Uuid::new_v4(),
            Platform::Slack,
            "m1",
            "t1",
            SenderProfile {
                id: "s1".into(),
                name: "Sender".into(),
                ..Default::default()
            },
            content,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_detect_sentiment_parses_model_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "{\"sentiment\":\"tense\",\"is_complaint\":true,\"needs_careful_response\":true,\"suggested_approach\":\"Lead with an apology\"}" }],
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let reading = detect_sentiment(&client, &state("this is unacceptable")).await;

        assert_eq!(reading.sentiment, Sentiment::Tense);
        assert!(reading.is_complaint);
        assert!(reading.needs_careful_response);
    }

    #[tokio::test]
    async fn test_unknown_sentiment_defaults_to_neutral() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "{\"sentiment\":\"ecstatic\"}" }],
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let reading = detect_sentiment(&client, &state("whatever")).await;
        assert_eq!(reading.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_fallback_distressed() {
        let reading = fallback_sentiment(&state("please help, this is an emergency"));
        assert_eq!(reading.sentiment, Sentiment::Distressed);
        assert!(reading.needs_careful_response);
    }

    #[test]
    fn test_fallback_urgent() {
        let reading = fallback_sentiment(&state("need the numbers right now"));
        assert_eq!(reading.sentiment, Sentiment::Urgent);
    }

    #[test]
    fn test_fallback_tense_marks_complaint() {
        let reading = fallback_sentiment(&state("frankly this is unacceptable"));
        assert_eq!(reading.sentiment, Sentiment::Tense);
        assert!(reading.is_complaint);
    }

    #[test]
    fn test_fallback_positive_and_neutral() {
        assert_eq!(
            fallback_sentiment(&state("thanks, appreciate it!")).sentiment,
            Sentiment::Positive
        );
        assert_eq!(
            fallback_sentiment(&state("meeting moved to 3pm")).sentiment,
            Sentiment::Neutral
        );
    }
}
