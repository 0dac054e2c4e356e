//! Context builder agent — relationship intelligence for the sender.
//!
//! Determines the relationship tier, an estimated reply rate and a short
//! summary of who the sender is, based on prior interaction history.
//! Falls back to domain heuristics when the provider is unavailable.

use crate::agents::SenderHistory;
use crate::llm::{clamp_unit, LlmClient, ModelTier};
use crate::message::{MessageState, RelationshipType, SenderAssessment};
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a relationship intelligence agent. Analyze communication patterns\n\
and determine the sender's relationship with the user.\n\
Respond with valid JSON only. No preamble.";

fn user_prompt(state: &MessageState, history: &SenderHistory) -> String {
    let history_text = if history.interactions.is_empty() {
        "No prior interactions found.".to_string()
    } else {
        history.interactions.join("\n")
    };

    format!(
        "SENDER INFO:\n\
         - Name: {name}\n\
         - Identifier: {identifier}\n\
         - Platform: {platform}\n\
         - Email: {email}\n\n\
         PAST INTERACTIONS (last 20):\n{history}\n\n\
         USER REPLY BEHAVIOR:\n\
         - Total messages: {total}\n\
         - Times replied: {replied}\n\
         - Avg reply time: {avg_reply_hours}h\n\n\
         Return JSON:\n\
         {{\n\
           \"relationship_type\": \"vip|close_contact|work_contact|acquaintance|stranger|bot|newsletter\",\n\
           \"reply_rate\": 0.0,\n\
           \"context_summary\": \"one sentence who this person is\",\n\
           \"is_likely_important\": true\n\
         }}",
        name = state.sender.name,
        identifier = state.sender.id,
        platform = state.platform,
        email = state.sender.email.as_deref().unwrap_or("unknown"),
        history = history_text,
        total = history.total_messages,
        replied = history.reply_count,
        avg_reply_hours = history.avg_reply_hours,
    )
}

/// Build sender context. Never fails — any provider or parse error
/// produces the heuristic fallback.
pub async fn build_context(
    client: &LlmClient,
    state: &MessageState,
    history: &SenderHistory,
) -> SenderAssessment {
    match client
        .complete_json(ModelTier::Fast, SYSTEM_PROMPT, &user_prompt(state, history), 256)
        .await
    {
        Ok(result) => {
            let assessment = SenderAssessment {
                relationship: result
                    .get("relationship_type")
                    .and_then(|v| v.as_str())
                    .and_then(RelationshipType::from_str)
                    .unwrap_or(RelationshipType::Stranger),
                reply_rate: clamp_unit(
                    result.get("reply_rate").and_then(|v| v.as_f64()).unwrap_or(0.0),
                ),
                context_summary: result
                    .get("context_summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                is_vip: result
                    .get("is_likely_important")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            };
            info!(
                sender = %state.sender.name,
                relationship = assessment.relationship.as_str(),
                vip = assessment.is_vip,
                "sender context built"
            );
            assessment
        }
        Err(e) => {
            warn!(sender = %state.sender.name, error = %e, "context builder degraded to fallback");
            fallback_context(state)
        }
    }
}

/// Domain heuristics: consumer mail domains look like acquaintances,
/// noreply-style senders look like bots, everyone else is a stranger.
pub fn fallback_context(state: &MessageState) -> SenderAssessment {
    let email = state.sender.email.as_deref().unwrap_or("").to_lowercase();

    let relationship = if ["noreply", "no-reply", "notifications", "mailer"]
        .iter()
        .any(|kw| email.contains(kw))
    {
        RelationshipType::Bot
    } else if ["@gmail.com", "@outlook.com", "@yahoo.com"]
        .iter()
        .any(|domain| email.contains(domain))
    {
        RelationshipType::Acquaintance
    } else {
        RelationshipType::Stranger
    };

    SenderAssessment {
        relationship,
        is_vip: false,
        reply_rate: state.sender.reply_rate,
        context_summary: "Context built using fallback rules (AI unavailable)".to_string(),
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

    fn state_with_email(email: Option<&str>) -> MessageState {
        MessageState::new(
            Uuid::new_v4(),
            Platform::Gmail,
            "m1",
            "t1",
            SenderProfile {
                id: "s1".into(),
                name: "Sender".into(),
                email: email.map(str::to_string),
                ..Default::default()
            },
            "hello",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_build_context_parses_model_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "{\"relationship_type\":\"close_contact\",\"reply_rate\":0.8,\"context_summary\":\"Longtime collaborator\",\"is_likely_important\":true}" }],
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let state = state_with_email(Some("ana@studio.dev"));
        let assessment = build_context(&client, &state, &SenderHistory::default()).await;

        assert_eq!(assessment.relationship, RelationshipType::CloseContact);
        assert_eq!(assessment.reply_rate, 0.8);
        assert!(assessment.is_vip);
        assert_eq!(assessment.context_summary, "Longtime collaborator");
    }

    #[tokio::test]
    async fn test_build_context_falls_back_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmConfig::new("k").with_base_url(server.uri())).unwrap();
        let state = state_with_email(Some("noreply@service.io"));
        let assessment = build_context(&client, &state, &SenderHistory::default()).await;

        assert_eq!(assessment.relationship, RelationshipType::Bot);
        assert!(assessment.context_summary.contains("fallback"));
    }

    #[test]
    fn test_fallback_consumer_domain_is_acquaintance() {
        let assessment = fallback_context(&state_with_email(Some("friend@gmail.com")));
        assert_eq!(assessment.relationship, RelationshipType::Acquaintance);
    }

    #[test]
    fn test_fallback_noreply_is_bot() {
        let assessment = fallback_context(&state_with_email(Some("no-reply@billing.acme.com")));
        assert_eq!(assessment.relationship, RelationshipType::Bot);
    }

    #[test]
    fn test_fallback_default_is_stranger() {
        let assessment = fallback_context(&state_with_email(None));
        assert_eq!(assessment.relationship, RelationshipType::Stranger);
    }
}
