//! Telegram adapter — Telegram Bot API.
//!
//! Polls `getUpdates` (long poll) as the dev/fallback path; production
//! delivery registers a per-user webhook via `setWebhook`.

use crate::registry::TelegramSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_core::adapter::{Credentials, PlatformAdapter, SendOptions, SendOutcome};
use prism_core::errors::{CoreError, CoreResult};
use prism_core::message::{timestamp_from_epoch, MessageState, Platform, SenderProfile};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

const LONG_POLL_SECONDS: u32 = 30;

pub struct TelegramAdapter {
    settings: TelegramSettings,
    http: HttpClient,
    api_base: String,
}

impl TelegramAdapter {
    pub fn new(settings: TelegramSettings) -> CoreResult<Self> {
        // Client timeout sits above the server-side long-poll window
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(35))
            .build()
            .map_err(|e| CoreError::configuration(format!("http client: {e}")))?;
        Ok(Self {
            settings,
            http,
            api_base: "https://api.telegram.org".to_string(),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    fn api_url(&self, method: &str, credentials: &Credentials) -> String {
        let token = credentials
            .bot_token
            .as_deref()
            .unwrap_or(&self.settings.bot_token);
        format!("{}/bot{token}/{method}", self.api_base)
    }
}

#[async_trait]
impl PlatformAdapter for TelegramAdapter {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn fetch_new_messages(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        credentials: &Credentials,
    ) -> CoreResult<Vec<Value>> {
        let response = self
            .http
            .get(self.api_url("getUpdates", credentials))
            .query(&[
                ("timeout", LONG_POLL_SECONDS.to_string()),
                (
                    "allowed_updates",
                    "[\"message\",\"edited_message\"]".to_string(),
                ),
            ])
            .send()
            .await
            .map_err(|e| CoreError::transient("telegram", &e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("telegram updates: {e}")))?;

        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let description = body
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(CoreError::permanent(
                "telegram",
                &format!("getUpdates: {description}"),
            ));
        }

        let cutoff = since.timestamp();
        let mut messages = Vec::new();
        for update in body
            .get("result")
            .and_then(|r| r.as_array())
            .into_iter()
            .flatten()
        {
            let msg = update
                .get("message")
                .or_else(|| update.get("edited_message"));
            if let Some(msg) = msg {
                if msg.get("date").and_then(|v| v.as_i64()).unwrap_or(0) >= cutoff {
                    let mut msg = msg.clone();
                    msg["_update_id"] = update.get("update_id").cloned().unwrap_or(json!(0));
                    messages.push(msg);
                }
            }
        }

        info!(%user_id, count = messages.len(), "fetched telegram messages");
        Ok(messages)
    }

    fn normalize(&self, raw: &Value, user_id: Uuid) -> CoreResult<MessageState> {
        let from = raw.get("from").cloned().unwrap_or_default();
        let chat = raw.get("chat").cloned().unwrap_or_default();

        let first = from.get("first_name").and_then(|v| v.as_str());
        let last = from.get("last_name").and_then(|v| v.as_str());
        let username = from.get("username").and_then(|v| v.as_str());

        let name = match (first, last) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (Some(f), None) => f.to_string(),
            _ => username.unwrap_or("Unknown").to_string(),
        };

        Ok(MessageState::new(
            user_id,
            Platform::Telegram,
            raw.get("message_id")
                .and_then(|v| v.as_i64())
                .unwrap_or_default()
                .to_string(),
            chat.get("id")
                .and_then(|v| v.as_i64())
                .unwrap_or_default()
                .to_string(),
            SenderProfile {
                id: from
                    .get("id")
                    .and_then(|v| v.as_i64())
                    .unwrap_or_default()
                    .to_string(),
                name,
                username: username.map(str::to_string),
                ..Default::default()
            },
            raw.get("text").and_then(|v| v.as_str()).unwrap_or_default(),
            timestamp_from_epoch(raw.get("date").and_then(|v| v.as_i64()).unwrap_or(0)),
        ))
    }

    async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        credentials: &Credentials,
        opts: &SendOptions,
    ) -> SendOutcome {
        let chat_id = opts.chat_id.clone().unwrap_or_else(|| thread_id.to_string());
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(reply_to) = &opts.reply_to_message_id {
            payload["reply_to_message_id"] = json!(reply_to);
        }

        let result = self
            .http
            .post(self.api_url("sendMessage", credentials))
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(body) if body.get("ok").and_then(|v| v.as_bool()) == Some(true) => {
                    info!(%chat_id, "sent telegram message");
                    let message_id = body
                        .pointer("/result/message_id")
                        .and_then(|v| v.as_i64())
                        .unwrap_or_default();
                    SendOutcome::sent(message_id.to_string())
                }
                Ok(body) => SendOutcome::failed(
                    body.get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Unknown error"),
                ),
                Err(e) => SendOutcome::failed(format!("unparseable send response: {e}")),
            },
            Err(e) => {
                error!(%chat_id, error = %e, "telegram send failed");
                SendOutcome::failed(e.to_string())
            }
        }
    }

    async fn setup_webhook(
        &self,
        user_id: Uuid,
        webhook_url: &str,
        credentials: &Credentials,
    ) -> CoreResult<Option<String>> {
        let full_url = format!("{webhook_url}/webhooks/telegram/{user_id}");
        let response = self
            .http
            .post(self.api_url("setWebhook", credentials))
            .json(&json!({
                "url": full_url,
                "allowed_updates": ["message", "edited_message"],
                "drop_pending_updates": true,
            }))
            .send()
            .await
            .map_err(|e| CoreError::transient("telegram", &e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("telegram webhook response: {e}")))?;

        if body.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            info!(%user_id, "telegram webhook registered");
            Ok(Some(format!("telegram-webhook-{user_id}")))
        } else {
            Err(CoreError::permanent(
                "telegram",
                body.get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("setWebhook failed"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> TelegramSettings {
        TelegramSettings {
            bot_token: "default-token".to_string(),
        }
    }

    #[test]
    fn test_normalize_assembles_name_from_parts() {
        let adapter = TelegramAdapter::new(settings()).unwrap();
        let raw = json!({
            "message_id": 88,
            "date": 1714559400,
            "text": "lunch?",
            "from": { "id": 5150, "first_name": "Nora", "last_name": "Quist", "username": "nq" },
            "chat": { "id": -100123 },
        });
        let state = adapter.normalize(&raw, Uuid::new_v4()).unwrap();

        assert_eq!(state.platform_message_id, "88");
        assert_eq!(state.thread_id, "-100123");
        assert_eq!(state.sender.id, "5150");
        assert_eq!(state.sender.name, "Nora Quist");
        assert_eq!(state.sender.username.as_deref(), Some("nq"));
        assert_eq!(state.timestamp.timestamp(), 1_714_559_400);
    }

    #[test]
    fn test_normalize_username_fallback() {
        let adapter = TelegramAdapter::new(settings()).unwrap();
        let raw = json!({
            "message_id": 1,
            "date": 1714559400,
            "text": "hi",
            "from": { "id": 2, "username": "ghost" },
            "chat": { "id": 2 },
        });
        let state = adapter.normalize(&raw, Uuid::new_v4()).unwrap();
        assert_eq!(state.sender.name, "ghost");
    }

    #[tokio::test]
    async fn test_fetch_filters_by_since() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/botuser-token/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    { "update_id": 1, "message": { "message_id": 1, "date": 100, "text": "old", "from": {}, "chat": {} } },
                    { "update_id": 2, "message": { "message_id": 2, "date": 2000, "text": "new", "from": {}, "chat": {} } },
                ],
            })))
            .mount(&server)
            .await;

        let adapter = TelegramAdapter::new(settings())
            .unwrap()
            .with_api_base(server.uri());
        let messages = adapter
            .fetch_new_messages(
                Uuid::new_v4(),
                timestamp_from_epoch(1000),
                &Credentials::bot("user-token"),
            )
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["text"], "new");
        assert_eq!(messages[0]["_update_id"], 2);
    }

    #[tokio::test]
    async fn test_send_includes_reply_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botdefault-token/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 99 },
            })))
            .mount(&server)
            .await;

        let adapter = TelegramAdapter::new(settings())
            .unwrap()
            .with_api_base(server.uri());
        let outcome = adapter
            .send_message(
                "-100123",
                "got it",
                &Credentials::default(),
                &SendOptions {
                    reply_to_message_id: Some("88".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(outcome.ok);
        assert_eq!(outcome.platform_message_id.as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn test_setup_webhook_builds_per_user_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botdefault-token/setWebhook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let adapter = TelegramAdapter::new(settings())
            .unwrap()
            .with_api_base(server.uri());
        let user_id = Uuid::new_v4();
        let webhook_id = adapter
            .setup_webhook(user_id, "https://prism.example", &Credentials::default())
            .await
            .unwrap();
        assert_eq!(webhook_id, Some(format!("telegram-webhook-{user_id}")));
    }
}
