//! Slack adapter — Slack Web API over OAuth2.
//!
//! Polls DM/group conversations via `conversations.list` +
//! `conversations.history`. Realtime delivery goes through the app-level
//! Events API, so webhook setup returns a synthetic id; events carry the
//! workspace (`team`) id which resolves to the owning user.

use crate::registry::SlackSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_core::adapter::{Credentials, PlatformAdapter, SendOptions, SendOutcome};
use prism_core::errors::{CoreError, CoreResult};
use prism_core::message::{parse_timestamp, MessageState, Platform, SenderProfile};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const SLACK_API_BASE: &str = "https://slack.com/api";
const HISTORY_WINDOW: &str = "50";

pub struct SlackAdapter {
    settings: SlackSettings,
    http: HttpClient,
    api_base: String,
}

impl SlackAdapter {
    pub fn new(settings: SlackSettings) -> CoreResult<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::configuration(format!("http client: {e}")))?;
        Ok(Self {
            settings,
            http,
            api_base: SLACK_API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    fn bearer(credentials: &Credentials) -> String {
        format!("Bearer {}", credentials.access_token)
    }
}

#[async_trait]
impl PlatformAdapter for SlackAdapter {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    async fn fetch_new_messages(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        credentials: &Credentials,
    ) -> CoreResult<Vec<Value>> {
        let response = self
            .http
            .get(format!("{}/conversations.list", self.api_base))
            .header("Authorization", Self::bearer(credentials))
            .query(&[("types", "im,mpim"), ("limit", "100")])
            .send()
            .await
            .map_err(|e| CoreError::transient("slack", &e.to_string()))?;

        let listing: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("slack listing: {e}")))?;

        if listing.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let reason = listing
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(match reason {
                "invalid_auth" | "token_revoked" | "account_inactive" => {
                    CoreError::auth(format!("slack: {reason}"))
                }
                _ => CoreError::permanent("slack", &format!("conversations.list: {reason}")),
            });
        }

        let oldest = format!("{}", since.timestamp());
        let mut messages = Vec::new();

        for channel in listing
            .get("channels")
            .and_then(|c| c.as_array())
            .into_iter()
            .flatten()
        {
            let Some(channel_id) = channel.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let channel_name = channel
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("DM")
                .to_string();

            let history = self
                .http
                .get(format!("{}/conversations.history", self.api_base))
                .header("Authorization", Self::bearer(credentials))
                .query(&[
                    ("channel", channel_id),
                    ("oldest", oldest.as_str()),
                    ("limit", HISTORY_WINDOW),
                ])
                .send()
                .await;

            let history: Value = match history {
                Ok(resp) => match resp.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(channel_id, error = %e, "unparseable slack history");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(channel_id, error = %e, "failed to fetch slack channel");
                    continue;
                }
            };

            if history.get("ok").and_then(|v| v.as_bool()) != Some(true) {
                warn!(
                    channel_id,
                    error = history.get("error").and_then(|v| v.as_str()).unwrap_or("unknown"),
                    "slack history not ok"
                );
                continue;
            }

            for msg in history
                .get("messages")
                .and_then(|m| m.as_array())
                .into_iter()
                .flatten()
            {
                let mut msg = msg.clone();
                msg["channel_id"] = json!(channel_id);
                msg["channel_name"] = json!(channel_name);
                messages.push(msg);
            }
        }

        info!(%user_id, count = messages.len(), "fetched slack messages");
        Ok(messages)
    }

    fn normalize(&self, raw: &Value, user_id: Uuid) -> CoreResult<MessageState> {
        let sender_id = raw
            .get("user")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let username = raw.get("username").and_then(|v| v.as_str());
        let ts = raw.get("ts").and_then(|v| v.as_str()).unwrap_or_default();
        let thread_id = raw
            .get("thread_ts")
            .and_then(|v| v.as_str())
            .unwrap_or(ts)
            .to_string();

        Ok(MessageState::new(
            user_id,
            Platform::Slack,
            ts,
            thread_id,
            SenderProfile {
                id: sender_id.clone(),
                name: username.unwrap_or(&sender_id).to_string(),
                username: username.map(str::to_string),
                ..Default::default()
            },
            raw.get("text").and_then(|v| v.as_str()).unwrap_or_default(),
            parse_timestamp(ts),
        ))
    }

    async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        credentials: &Credentials,
        opts: &SendOptions,
    ) -> SendOutcome {
        let channel = opts.channel_id.clone().unwrap_or_default();
        let result = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .header("Authorization", Self::bearer(credentials))
            .json(&json!({
                "channel": channel,
                "text": text,
                "thread_ts": thread_id,
            }))
            .send()
            .await;

        match result {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(body) if body.get("ok").and_then(|v| v.as_bool()) == Some(true) => {
                    info!(thread_id, "sent slack message");
                    SendOutcome::sent(body.get("ts").and_then(|v| v.as_str()).unwrap_or_default())
                }
                Ok(body) => SendOutcome::failed(
                    body.get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Unknown error"),
                ),
                Err(e) => SendOutcome::failed(format!("unparseable send response: {e}")),
            },
            Err(e) => {
                error!(thread_id, error = %e, "slack send failed");
                SendOutcome::failed(e.to_string())
            }
        }
    }

    async fn setup_webhook(
        &self,
        user_id: Uuid,
        _webhook_url: &str,
        _credentials: &Credentials,
    ) -> CoreResult<Option<String>> {
        // Events API subscriptions are configured at the app level, not
        // per user. Return a synthetic confirmation id.
        info!(%user_id, "slack events are app-level; user connected");
        Ok(Some(format!("slack-events-{user_id}")))
    }

    async fn refresh_credentials(&self, credentials: &Credentials) -> CoreResult<Option<Credentials>> {
        let Some(refresh_token) = &credentials.refresh_token else {
            return Ok(None);
        };

        let response = self
            .http
            .post(format!("{}/oauth.v2.access", self.api_base))
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CoreError::transient("slack", &e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("slack token response: {e}")))?;

        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            warn!("slack token refresh refused");
            return Ok(None);
        }

        let Some(access_token) = body.get("access_token").and_then(|v| v.as_str()) else {
            return Ok(None);
        };

        Ok(Some(Credentials {
            access_token: access_token.to_string(),
            refresh_token: body
                .get("refresh_token")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| Some(refresh_token.clone())),
            bot_token: None,
        }))
    }
}
