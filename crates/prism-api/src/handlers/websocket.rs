//! WS /ws/feed — live feed updates.
//!
//! Authenticated by JWT in the query string (invalid tokens close with
//! code 4001). Server events arrive through the hub (fed by the pub/sub
//! relay); client events are mark_read, snooze and ping.

use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use chrono::Utc;
use futures_util::StreamExt;
use prism_db::repositories::{MessagePatch, MessageRepository};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

const CLOSE_UNAUTHORIZED: u16 = 4001;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

pub async fn feed_websocket(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsAuthQuery>,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;

    match state.tokens.authenticate(&query.token) {
        Ok(user_id) => {
            actix_web::rt::spawn(handle_connection(
                state.into_inner(),
                user_id,
                session,
                msg_stream,
            ));
        }
        Err(e) => {
            warn!(error = %e, "websocket auth failed");
            actix_web::rt::spawn(async move {
                let _ = session
                    .close(Some(CloseReason {
                        code: CloseCode::from(CLOSE_UNAUTHORIZED),
                        description: Some("Invalid or expired token".to_string()),
                    }))
                    .await;
            });
        }
    }

    Ok(response)
}

async fn handle_connection(
    state: std::sync::Arc<AppState>,
    user_id: Uuid,
    mut session: Session,
    mut msg_stream: MessageStream,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = state.hub.connect(user_id, tx).await;
    info!(%user_id, "feed websocket open");

    loop {
        tokio::select! {
            // Events pushed for this user (relay or local pipeline)
            Some(payload) = rx.recv() => {
                if session.text(payload).await.is_err() {
                    break;
                }
            }

            // Client events
            frame = msg_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_event(&state, user_id, &mut session, &text).await;
                    }
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%user_id, error = %e, "websocket protocol error");
                        break;
                    }
                    _ => {}
                }
            }

            else => break,
        }
    }

    state.hub.disconnect(user_id, conn_id).await;
    info!(%user_id, "feed websocket closed");
}

async fn handle_client_event(
    state: &AppState,
    user_id: Uuid,
    session: &mut Session,
    raw: &str,
) {
    let Ok(payload) = serde_json::from_str::<Value>(raw) else {
        let _ = session
            .text(json!({ "event": "error", "data": { "message": "Invalid JSON" } }).to_string())
            .await;
        return;
    };

    match payload.get("event").and_then(|v| v.as_str()) {
        Some("mark_read") => {
            if let Some(message_id) = message_id_of(&payload) {
                apply_patch(
                    state,
                    user_id,
                    message_id,
                    MessagePatch {
                        is_read: Some(true),
                        ..Default::default()
                    },
                )
                .await;
            }
        }
        Some("snooze") => {
            let until = payload
                .get("until")
                .and_then(|v| v.as_str())
                .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc));
            if let (Some(message_id), Some(until)) = (message_id_of(&payload), until) {
                apply_patch(
                    state,
                    user_id,
                    message_id,
                    MessagePatch {
                        snoozed_until: Some(until),
                        ..Default::default()
                    },
                )
                .await;
            }
        }
        Some("ping") => {
            let _ = session.text(json!({ "event": "pong" }).to_string()).await;
        }
        other => {
            warn!(%user_id, event = ?other, "unhandled websocket client event");
        }
    }
}

fn message_id_of(payload: &Value) -> Option<Uuid> {
    payload
        .get("message_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

async fn apply_patch(state: &AppState, user_id: Uuid, message_id: Uuid, patch: MessagePatch) {
    let repo = MessageRepository::new(&state.db);
    if let Err(e) = repo.update_state(message_id, user_id, &patch).await {
        warn!(%user_id, %message_id, error = %e, "websocket state update failed");
        return;
    }
    let _ = state.cache.invalidate_feed(&user_id.to_string()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_extraction() {
        let id = Uuid::new_v4();
        let payload = json!({ "event": "mark_read", "message_id": id.to_string() });
        assert_eq!(message_id_of(&payload), Some(id));

        assert_eq!(message_id_of(&json!({ "event": "mark_read" })), None);
        assert_eq!(
            message_id_of(&json!({ "message_id": "not-a-uuid" })),
            None
        );
    }
}
