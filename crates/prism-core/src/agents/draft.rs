//! Draft reply agent — generates platform-appropriate reply drafts.
//!
//! Uses the quality model tier since this is user-facing content. The
//! draft must match the platform tone profile, address the received
//! content, never open with stock pleasantries, and be a single string
//! with no surrounding markup.

use crate::llm::{LlmClient, ModelTier};
use crate::message::{MessageState, Platform, Sentiment};
use tracing::{error, info};

const SYSTEM_PROMPT: &str = "You draft messages on behalf of users across communication platforms.\n\n\
Rules:\n\
1. Match the platform's communication style exactly\n\
2. Address the actual question/request — not a generic reply\n\
3. Sound human — never start with \"Certainly!\" or \"Of course!\"\n\
4. Return ONLY the reply text, nothing else";

const CONTENT_LIMIT: usize = 3000;
const THREAD_WINDOW: usize = 5;

/// Fixed tone profile per platform.
pub fn tone_profile(platform: Platform) -> &'static str {
    match platform {
        Platform::Gmail => {
            "Professional email. Proper greeting with name. Full sentences. Formal sign-off. Max 150 words."
        }
        Platform::Slack => {
            "Slack. No greeting. Under 3 sentences. Casual-professional. Emoji ok if appropriate."
        }
        Platform::Telegram => {
            "Telegram. Short and direct. Warm if known, neutral if stranger. 1-3 sentences."
        }
        Platform::Discord => "Discord. Community casual. 1-2 sentences. Use @name if channel reply.",
        Platform::Whatsapp => {
            "WhatsApp. Personal and warm. Short sentences. Natural spoken language. 1-3 sentences."
        }
    }
}

/// Short tone tag reported back to the client alongside the draft.
pub fn tone_tag(platform: Platform) -> &'static str {
    match platform {
        Platform::Gmail => "professional",
        Platform::Slack => "casual-professional",
        Platform::Telegram => "direct",
        Platform::Discord => "casual",
        Platform::Whatsapp => "warm-personal",
    }
}

fn user_prompt(state: &MessageState, thread_context: &[String]) -> String {
    let careful_note = if matches!(
        state.enrichment.sentiment,
        Sentiment::Tense | Sentiment::Distressed
    ) {
        let mut note =
            "NOTE: This message has a tense/distressed tone. Be empathetic and careful. ".to_string();
        if !state.enrichment.suggested_approach.is_empty() {
            note.push_str(&format!(
                "Suggested approach: {}",
                state.enrichment.suggested_approach
            ));
        }
        note
    } else {
        String::new()
    };

    let thread_text = if thread_context.is_empty() {
        "No prior messages in thread.".to_string()
    } else {
        let start = thread_context.len().saturating_sub(THREAD_WINDOW);
        thread_context[start..].join("\n")
    };

    let content: String = state.content_text.chars().take(CONTENT_LIMIT).collect();

    format!(
        "PLATFORM: {platform}\n\
         TONE: {tone}\n\
         SENDER: {name} ({relationship})\n\
         SENTIMENT: {sentiment}\n\
         {careful_note}\n\n\
         THREAD (newest last):\n{thread_text}\n\n\
         MESSAGE TO REPLY:\n{content}",
        platform = state.platform,
        tone = tone_profile(state.platform),
        name = state.sender.name,
        relationship = state.sender.relationship.as_str(),
        sentiment = state.enrichment.sentiment.as_str(),
    )
}

/// Generate a reply draft. Returns the fallback template on any failure.
pub async fn generate_draft(
    client: &LlmClient,
    state: &MessageState,
    thread_context: &[String],
) -> String {
    match client
        .complete(
            ModelTier::Quality,
            SYSTEM_PROMPT,
            &user_prompt(state, thread_context),
            512,
        )
        .await
    {
        Ok(text) => {
            let draft = text.trim().to_string();
            info!(
                message_id = %state.id,
                platform = %state.platform,
                chars = draft.len(),
                "draft generated"
            );
            draft
        }
        Err(e) => {
            error!(message_id = %state.id, error = %e, "draft agent degraded to fallback");
            fallback_draft(state)
        }
    }
}

/// Platform-keyed template addressing the sender by name.
pub fn fallback_draft(state: &MessageState) -> String {
    let sender = &state.sender.name;
    match state.platform {
        Platform::Gmail => format!(
            "Hi {sender},\n\nThank you for your message. I'll review this and get back to you shortly.\n\nBest regards"
        ),
        Platform::Slack => {
            "Thanks for the heads up — let me look into this and get back to you.".to_string()
        }
        Platform::Telegram => "Got it, will follow up on this.".to_string(),
        Platform::Discord => format!("@{sender} noted, will check on this"),
        Platform::Whatsapp => {
            format!("Hey {sender}, thanks for reaching out! Let me get back to you on this.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmConfig;
    use crate::message::SenderProfile;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state(platform: Platform, sentiment: Sentiment) -> MessageState {
        let mut s = MessageState::new(
            Uuid::new_v4(),
            platform,
            "m1",
            "t1",
            SenderProfile {
                id: "s1".into(),
                name: "Maya".into(),
                ..Default::default()
            },
            "could you send over the final deck?",
            Utc::now(),
        );
        s.enrichment.sentiment = sentiment;
        s
    }

    #[tokio::test]
    async fn test_generate_draft_trims_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "  Sending it over now — give me ten minutes.  " }],
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let draft = generate_draft(&client, &state(Platform::Slack, Sentiment::Neutral), &[]).await;
        assert_eq!(draft, "Sending it over now — give me ten minutes.");
    }

    #[tokio::test]
    async fn test_generate_draft_uses_quality_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(body_partial_json(serde_json::json!({ "model": "claude-sonnet-4-6" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "On it." }],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let _ = generate_draft(&client, &state(Platform::Slack, Sentiment::Neutral), &[]).await;
    }

    #[tokio::test]
    async fn test_generate_draft_falls_back_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let draft = generate_draft(&client, &state(Platform::Gmail, Sentiment::Neutral), &[]).await;
        assert!(draft.starts_with("Hi Maya,"));
    }

    #[test]
    fn test_careful_note_present_for_tense_messages() {
        let prompt = user_prompt(&state(Platform::Gmail, Sentiment::Tense), &[]);
        assert!(prompt.contains("tense/distressed"));

        let calm = user_prompt(&state(Platform::Gmail, Sentiment::Neutral), &[]);
        assert!(!calm.contains("tense/distressed"));
    }

    #[test]
    fn test_thread_context_windowed_to_last_five() {
        let thread: Vec<String> = (1..=8).map(|i| format!("msg {i}")).collect();
        let prompt = user_prompt(&state(Platform::Slack, Sentiment::Neutral), &thread);
        assert!(!prompt.contains("msg 3"));
        assert!(prompt.contains("msg 4"));
        assert!(prompt.contains("msg 8"));
    }

    #[test]
    fn test_fallback_templates_per_platform() {
        let gmail = fallback_draft(&state(Platform::Gmail, Sentiment::Neutral));
        assert!(gmail.contains("Maya"));
        assert!(gmail.contains("Best regards"));

        let discord = fallback_draft(&state(Platform::Discord, Sentiment::Neutral));
        assert!(discord.starts_with("@Maya"));

        let telegram = fallback_draft(&state(Platform::Telegram, Sentiment::Neutral));
        assert!(telegram.len() < 60);
    }

    #[test]
    fn test_tone_tags() {
        assert_eq!(tone_tag(Platform::Gmail), "professional");
        assert_eq!(tone_tag(Platform::Whatsapp), "warm-personal");
    }
}
