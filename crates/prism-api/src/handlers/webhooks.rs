//! Webhook receivers.
//!
//! Every receiver returns 2xx once the payload is accepted — downstream
//! failures are internal, and a non-2xx would only trigger platform
//! retry storms. Processing is handed off to background tasks.

use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use prism_adapters::signature::verify_slack_signature;
use prism_db::repositories::UserRepository;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

/// POST /webhooks/gmail — Gmail push notification (Pub/Sub envelope).
/// Resolves the mailbox owner and triggers an incremental sync.
pub async fn gmail_webhook(
    payload: web::Json<Value>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let encoded = payload
        .pointer("/message/data")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if encoded.is_empty() {
        return HttpResponse::Ok().json(json!({ "ok": true }));
    }

    let notification: Option<Value> = BASE64
        .decode(encoded)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());
    let Some(notification) = notification else {
        warn!("undecodable gmail push payload");
        return HttpResponse::Ok().json(json!({ "ok": true }));
    };

    let email = notification
        .get("emailAddress")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let history_id = notification
        .get("historyId")
        .map(|v| v.to_string())
        .unwrap_or_default();
    info!(%email, %history_id, "gmail webhook received");

    let state = state.into_inner();
    tokio::spawn(async move {
        let user = match UserRepository::new(&state.db).find_by_email(&email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(%email, "no user for gmail push");
                return;
            }
            Err(e) => {
                warn!(error = %e, "user lookup failed for gmail push");
                return;
            }
        };
        if let Err(e) = state.engine.sync_user_platform(user.id, "gmail").await {
            warn!(user_id = %user.id, error = %e, "gmail incremental sync failed");
        }
    });

    HttpResponse::Ok().json(json!({ "ok": true }))
}

/// POST /webhooks/slack — Slack Events API. Answers the one-time URL
/// verification challenge and validates the request signature before
/// accepting events.
pub async fn slack_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return HttpResponse::Ok().json(json!({ "ok": true }));
    };

    // URL verification happens before the app is installed anywhere
    if payload.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
        return HttpResponse::Ok().json(json!({
            "challenge": payload.get("challenge").cloned().unwrap_or_default(),
        }));
    }

    let signing_secret = &state.config.adapters.slack.signing_secret;
    if !signing_secret.is_empty() {
        let timestamp = header(&req, "X-Slack-Request-Timestamp");
        let signature = header(&req, "X-Slack-Signature");
        let body_str = String::from_utf8_lossy(&body);
        if !verify_slack_signature(signing_secret, &timestamp, &body_str, &signature) {
            return HttpResponse::Forbidden().json(json!({ "detail": "Invalid Slack signature" }));
        }
    } else {
        warn!("slack signing secret not configured, skipping verification");
    }

    let event = payload.get("event").cloned().unwrap_or_default();

    // Skip our own bot traffic
    if event.get("bot_id").is_some() {
        return HttpResponse::Ok().json(json!({ "ok": true }));
    }

    let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
    if event_type == "message" || event_type == "app_mention" {
        // Skip edits/deletes and other subtypes, thread broadcasts aside
        let subtype = event.get("subtype").and_then(|v| v.as_str());
        if matches!(subtype, Some(s) if s != "thread_broadcast") {
            return HttpResponse::Ok().json(json!({ "ok": true }));
        }

        let raw = json!({
            "user": event.get("user").cloned().unwrap_or_default(),
            "channel": event.get("channel").cloned().unwrap_or_default(),
            "text": event.get("text").cloned().unwrap_or_default(),
            "ts": event.get("ts").cloned().unwrap_or_default(),
            "thread_ts": event.get("thread_ts").cloned().unwrap_or(Value::Null),
            "team": payload.get("team_id").cloned().unwrap_or_default(),
        });

        let state = state.into_inner();
        tokio::spawn(async move {
            state.engine.process_webhook("slack", raw).await;
        });
    }

    HttpResponse::Ok().json(json!({ "ok": true }))
}

/// POST /webhooks/telegram/{user_id} — per-user Telegram webhook.
pub async fn telegram_webhook(
    path: web::Path<Uuid>,
    payload: web::Json<Value>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let user_id = path.into_inner();
    let message = payload
        .get("message")
        .or_else(|| payload.get("edited_message"));

    let Some(message) = message else {
        return HttpResponse::Ok().json(json!({ "ok": true }));
    };
    // Text messages only for now
    if message.get("text").and_then(|v| v.as_str()).is_none() {
        return HttpResponse::Ok().json(json!({ "ok": true }));
    }

    let mut raw = message.clone();
    raw["user_id"] = json!(user_id.to_string());
    info!(%user_id, "telegram webhook received");

    let state = state.into_inner();
    tokio::spawn(async move {
        state.engine.process_webhook("telegram", raw).await;
    });

    HttpResponse::Ok().json(json!({ "ok": true }))
}

fn header(req: &HttpRequest, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
