//! AI action endpoints — draft replies, send, reclassify.

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use prism_core::adapter::{Credentials, SendOptions};
use prism_core::agents::draft;
use prism_core::message::{Platform, PriorityLabel};
use prism_db::entities::message;
use prism_db::repositories::{CredentialRepository, MessageRepository};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub draft: String,
    pub tone_used: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveDraftRequest {
    pub edited_draft: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReclassifyRequest {
    pub correct_label: String,
}

async fn load_message(
    state: &AppState,
    id: Uuid,
    user_id: Uuid,
) -> ApiResult<message::Model> {
    MessageRepository::new(&state.db)
        .find_for_user(id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Message not found".to_string()))
}

/// POST /api/v1/draft/{id} — generate an AI draft reply. Rate limited to
/// the AI-action bucket.
pub async fn create_draft(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let allowed = state
        .cache
        .check_rate_limit(
            &user.user_id.to_string(),
            "draft",
            state.config.rate_limits.ai_actions,
        )
        .await?;
    if !allowed {
        return Err(ApiError::RateLimited("AI actions".to_string()));
    }

    let model = load_message(&state, path.into_inner(), user.user_id).await?;
    let message_state = model.to_state();

    let repo = MessageRepository::new(&state.db);
    let thread_context: Vec<String> = repo
        .thread_context(
            user.user_id,
            &model.platform,
            model.thread_id.as_deref().unwrap_or_default(),
            5,
        )
        .await?
        .into_iter()
        .filter_map(|m| {
            let text = m.content_text?;
            Some(format!(
                "{}: {text}",
                m.sender_name.unwrap_or_else(|| m.sender_id.clone())
            ))
        })
        .collect();

    let draft_text = draft::generate_draft(&state.llm, &message_state, &thread_context).await;
    repo.set_draft(model.id, user.user_id, &draft_text).await?;

    Ok(HttpResponse::Ok().json(DraftResponse {
        draft: draft_text,
        tone_used: draft::tone_tag(message_state.platform).to_string(),
    }))
}

/// PUT /api/v1/draft/{id} — save an edited draft.
pub async fn save_draft(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<SaveDraftRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    if payload.edited_draft.is_empty() {
        return Err(ApiError::BadRequest("edited_draft is required".to_string()));
    }

    let model = load_message(&state, path.into_inner(), user.user_id).await?;
    MessageRepository::new(&state.db)
        .set_draft(model.id, user.user_id, &payload.edited_draft)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/// POST /api/v1/send/{id} — send a reply through the originating
/// platform using the user's sealed credentials.
pub async fn send_reply(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<SendRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let model = load_message(&state, path.into_inner(), user.user_id).await?;

    let cred = CredentialRepository::new(&state.db)
        .find(user.user_id, &model.platform)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "No {} credentials found. Reconnect the platform.",
                model.platform
            ))
        })?;

    let credentials = Credentials {
        access_token: state.vault.open(&cred.access_token)?,
        refresh_token: cred
            .refresh_token
            .as_deref()
            .map(|sealed| state.vault.open(sealed))
            .transpose()?,
        bot_token: None,
    };

    let adapter = state
        .registry
        .get(&model.platform)
        .ok_or_else(|| ApiError::BadRequest(format!("Unsupported platform: {}", model.platform)))?;

    let thread_id = model.thread_id.clone().unwrap_or_default();
    let opts = send_options_for(&model, &thread_id);

    let outcome = adapter
        .send_message(&thread_id, &payload.text, &credentials, &opts)
        .await;

    if outcome.ok {
        let _ = state.cache.invalidate_feed(&user.user_id.to_string()).await;
        info!(user_id = %user.user_id, platform = %model.platform, "reply sent");
    }

    Ok(HttpResponse::Ok().json(SendResponse {
        success: outcome.ok,
        platform_message_id: outcome.platform_message_id,
        error: outcome.error,
    }))
}

/// Platform-specific addressing hints for the send call.
fn send_options_for(model: &message::Model, thread_id: &str) -> SendOptions {
    match Platform::from_str(&model.platform) {
        Some(Platform::Gmail) => SendOptions {
            to_email: model
                .sender_email
                .clone()
                .or_else(|| Some(model.sender_id.clone())),
            subject: Some("Re: ".to_string()),
            ..Default::default()
        },
        Some(Platform::Slack) => SendOptions {
            channel_id: Some(thread_id.to_string()),
            ..Default::default()
        },
        Some(Platform::Telegram) => SendOptions {
            chat_id: Some(thread_id.to_string()),
            reply_to_message_id: Some(model.platform_message_id.clone()),
            ..Default::default()
        },
        Some(Platform::Discord) => SendOptions {
            channel_id: Some(thread_id.to_string()),
            ..Default::default()
        },
        _ => SendOptions::default(),
    }
}

/// POST /api/v1/message/{id}/reclassify — user feedback on the AI's
/// classification. Overrides the score per the label map.
pub async fn reclassify_message(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<ReclassifyRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let label = PriorityLabel::from_str(&payload.correct_label).ok_or_else(|| {
        ApiError::BadRequest(
            "Invalid label. Must be one of: urgent, action, fyi, social, spam".to_string(),
        )
    })?;

    let id = path.into_inner();
    let model = load_message(&state, id, user.user_id).await?;
    let reasoning = format!(
        "User corrected from '{}' to '{}'",
        model.priority_label,
        label.as_str()
    );

    MessageRepository::new(&state.db)
        .reclassify(id, user.user_id, label.as_str(), label.override_score(), &reasoning)
        .await?;

    let _ = state.cache.invalidate_feed(&user.user_id.to_string()).await;

    info!(
        user_id = %user.user_id,
        message_id = %id,
        from = %model.priority_label,
        to = label.as_str(),
        "message reclassified"
    );

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn model(platform: &str) -> message::Model {
        message::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            platform: platform.to_string(),
            platform_message_id: "pm-1".to_string(),
            thread_id: Some("thread-1".to_string()),
            sender_id: "sender-1".to_string(),
            sender_name: Some("Ada".to_string()),
            sender_email: Some("ada@example.com".to_string()),
            content_text: Some("hello".to_string()),
            timestamp: Utc::now(),
            is_read: false,
            is_done: false,
            snoozed_until: None,
            priority_score: 0.5,
            priority_label: "fyi".to_string(),
            sentiment: "neutral".to_string(),
            ai_context_note: None,
            summary: None,
            classification_reasoning: None,
            is_complaint: false,
            needs_careful_response: false,
            suggested_approach: None,
            suggested_actions: serde_json::json!([]),
            draft_reply: None,
            processed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_send_options_per_platform() {
        let gmail = send_options_for(&model("gmail"), "thread-1");
        assert_eq!(gmail.to_email.as_deref(), Some("ada@example.com"));
        assert_eq!(gmail.subject.as_deref(), Some("Re: "));

        let slack = send_options_for(&model("slack"), "thread-1");
        assert_eq!(slack.channel_id.as_deref(), Some("thread-1"));

        let telegram = send_options_for(&model("telegram"), "thread-1");
        assert_eq!(telegram.chat_id.as_deref(), Some("thread-1"));
        assert_eq!(telegram.reply_to_message_id.as_deref(), Some("pm-1"));

        let discord = send_options_for(&model("discord"), "thread-1");
        assert_eq!(discord.channel_id.as_deref(), Some("thread-1"));
    }

    #[test]
    fn test_gmail_send_falls_back_to_sender_id() {
        let mut m = model("gmail");
        m.sender_email = None;
        let opts = send_options_for(&m, "t");
        assert_eq!(opts.to_email.as_deref(), Some("sender-1"));
    }
}
