//! Feed endpoints — ranked feed, thread view, message state updates.

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use prism_core::agents::summarizer::{self, ThreadSummary};
use prism_core::llm::LlmClient;
use prism_core::message::{MessageState, Platform};
use prism_db::repositories::{FeedFilter, MessagePatch, MessageRepository};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

const DEFAULT_FEED_LIMIT: u64 = 50;
/// Threads longer than this get an AI summary.
const THREAD_SUMMARY_THRESHOLD: usize = 5;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub platform: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub messages: Vec<MessageState>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadResponse {
    pub messages: Vec<MessageState>,
    pub summary: Option<ThreadSummary>,
    pub message_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct MessageUpdateRequest {
    pub is_read: Option<bool>,
    pub is_done: Option<bool>,
    pub snoozed_until: Option<String>,
}

/// GET /api/v1/feed — the ranked priority feed. Unfiltered first pages
/// are served from the 30s cache.
pub async fn get_feed(
    user: AuthenticatedUser,
    query: web::Query<FeedQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, 100);
    let offset = query.offset.unwrap_or(0);
    let user_key = user.user_id.to_string();

    let cacheable = query.platform.is_none() && query.priority.is_none() && offset == 0;
    if cacheable {
        if let Ok(Some(cached)) = state.cache.get_feed::<Vec<MessageState>>(&user_key).await {
            let total = cached.len() as u64;
            let messages: Vec<MessageState> =
                cached.into_iter().take(limit as usize).collect();
            return Ok(HttpResponse::Ok().json(FeedResponse {
                has_more: total > messages.len() as u64,
                total,
                messages,
            }));
        }
    }

    let repo = MessageRepository::new(&state.db);
    let filter = FeedFilter {
        platform: query.platform.clone(),
        priority: query.priority.clone(),
    };
    let page = repo.feed(user.user_id, &filter, offset, limit).await?;

    let messages: Vec<MessageState> = page.messages.iter().map(|m| m.to_state()).collect();

    if cacheable && !messages.is_empty() {
        let _ = state.cache.set_feed(&user_key, &messages).await;
    }

    Ok(HttpResponse::Ok().json(FeedResponse {
        has_more: offset + limit < page.total,
        total: page.total,
        messages,
    }))
}

/// GET /api/v1/thread/{platform}/{thread_id} — full thread with an AI
/// summary for long threads.
pub async fn get_thread(
    user: AuthenticatedUser,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let (platform, thread_id) = path.into_inner();

    if let Ok(Some(cached)) = state
        .cache
        .get_thread::<ThreadResponse>(&platform, &thread_id)
        .await
    {
        return Ok(HttpResponse::Ok().json(cached));
    }

    let repo = MessageRepository::new(&state.db);
    let rows = repo.thread(user.user_id, &platform, &thread_id).await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound("Thread not found".to_string()));
    }

    let messages: Vec<MessageState> = rows.iter().map(|m| m.to_state()).collect();
    let summary =
        summarize_if_long(&state.llm, &platform, &messages).await;

    let response = ThreadResponse {
        message_count: messages.len(),
        summary,
        messages,
    };
    let _ = state.cache.set_thread(&platform, &thread_id, &response).await;

    Ok(HttpResponse::Ok().json(response))
}

async fn summarize_if_long(
    llm: &LlmClient,
    platform: &str,
    messages: &[MessageState],
) -> Option<ThreadSummary> {
    if messages.len() <= THREAD_SUMMARY_THRESHOLD {
        return None;
    }
    let platform = Platform::from_str(platform)?;
    let participants: Vec<String> = messages
        .iter()
        .map(|m| m.sender.name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let texts: Vec<String> = messages
        .iter()
        .map(|m| format!("{}: {}", m.sender.name, m.content_text))
        .collect();
    summarizer::summarize_thread(llm, platform, &participants, &texts).await
}

/// PATCH /api/v1/message/{id} — mark read, mark done, or snooze.
pub async fn update_message(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<MessageUpdateRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let snoozed_until = match &payload.snoozed_until {
        Some(raw) => {
            let parsed = chrono::DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                        .map(|naive| chrono::TimeZone::from_utc_datetime(&chrono::Utc, &naive))
                })
                .map_err(|_| ApiError::BadRequest("Invalid snoozed_until format".to_string()))?;
            Some(parsed)
        }
        None => None,
    };

    let patch = MessagePatch {
        is_read: payload.is_read,
        is_done: payload.is_done,
        snoozed_until,
    };
    if patch.is_empty() {
        return Err(ApiError::BadRequest("Empty update".to_string()));
    }

    let repo = MessageRepository::new(&state.db);
    repo.update_state(path.into_inner(), user.user_id, &patch)
        .await?;

    let _ = state.cache.invalidate_feed(&user.user_id.to_string()).await;

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_query_defaults() {
        let query: FeedQuery = serde_json::from_str("{}").unwrap();
        assert!(query.limit.is_none());
        assert!(query.platform.is_none());
    }

    #[test]
    fn test_thread_response_round_trips_through_cache_shape() {
        let response = ThreadResponse {
            messages: vec![],
            summary: None,
            message_count: 0,
        };
        let json = serde_json::to_string(&response).unwrap();
        let parsed: ThreadResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.message_count, 0);
    }
}
