//! Thread summarizer agent — condenses long threads into actionable
//! bullet points. Triggered when a thread has more than 5 messages;
//! returns None below 3 messages and on any failure.

use crate::llm::{LlmClient, ModelTier};
use crate::message::Platform;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You summarize conversation threads into actionable bullet points.\nRespond with JSON only.";

const MESSAGE_WINDOW: usize = 20;

/// Summary of a long thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadSummary {
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub current_status: String,
    pub next_step: Option<String>,
}

fn user_prompt(platform: Platform, participants: &[String], messages: &[String]) -> String {
    let start = messages.len().saturating_sub(MESSAGE_WINDOW);
    format!(
        "PLATFORM: {platform}\n\
         PARTICIPANTS: {participants}\n\
         MESSAGES ({count} total):\n{messages}\n\n\
         Return JSON:\n\
         {{\n\
           \"key_points\": [\"max 3 bullets of what was discussed/decided\"],\n\
           \"action_items\": [\"any actions requested or agreed to\"],\n\
           \"current_status\": \"one sentence where things stand\",\n\
           \"next_step\": \"what user needs to do, or null\"\n\
         }}",
        participants = participants.join(", "),
        count = messages.len(),
        messages = messages[start..].join("\n---\n"),
    )
}

/// Summarize a thread into key points, action items, status, and next
/// step. Returns None on failure or when there is too little to say.
pub async fn summarize_thread(
    client: &LlmClient,
    platform: Platform,
    participants: &[String],
    messages: &[String],
) -> Option<ThreadSummary> {
    if messages.len() < 3 {
        return None;
    }

    match client
        .complete_json(
            ModelTier::Fast,
            SYSTEM_PROMPT,
            &user_prompt(platform, participants, messages),
            512,
        )
        .await
    {
        Ok(result) => {
            let strings = |key: &str| -> Vec<String> {
                result
                    .get(key)
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            };

            let mut key_points = strings("key_points");
            key_points.truncate(3);

            let summary = ThreadSummary {
                key_points,
                action_items: strings("action_items"),
                current_status: result
                    .get("current_status")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                next_step: result
                    .get("next_step")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            };
            info!(key_points = summary.key_points.len(), "thread summarized");
            Some(summary)
        }
        Err(e) => {
            warn!(error = %e, "thread summarizer failed");
            None
        }
    }
}
