//! Discord adapter — Bot REST API plus the Gateway WebSocket.
//!
//! Polling reads DM channels over REST; realtime delivery runs one
//! long-lived gateway task per connected bot with its own reconnect loop
//! and heartbeat at the server-supplied interval. `MESSAGE_CREATE`
//! dispatches feed the same ingest path as webhooks.

use crate::registry::DiscordSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use prism_core::adapter::{Credentials, PlatformAdapter, SendOptions, SendOutcome};
use prism_core::errors::{CoreError, CoreResult};
use prism_core::message::{parse_timestamp, MessageState, Platform, SenderProfile};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{error, info, warn};
use uuid::Uuid;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES
const GATEWAY_INTENTS: u64 = 4608;

const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_HELLO: u64 = 10;

pub struct DiscordAdapter {
    settings: DiscordSettings,
    http: HttpClient,
    api_base: String,
}

impl DiscordAdapter {
    pub fn new(settings: DiscordSettings) -> CoreResult<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::configuration(format!("http client: {e}")))?;
        Ok(Self {
            settings,
            http,
            api_base: DISCORD_API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    fn bot_auth(&self, credentials: &Credentials) -> String {
        let token = credentials
            .bot_token
            .as_deref()
            .unwrap_or(&self.settings.bot_token);
        format!("Bot {token}")
    }
}

#[async_trait]
impl PlatformAdapter for DiscordAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn fetch_new_messages(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        credentials: &Credentials,
    ) -> CoreResult<Vec<Value>> {
        let response = self
            .http
            .get(format!("{}/users/@me/channels", self.api_base))
            .header("Authorization", self.bot_auth(credentials))
            .send()
            .await
            .map_err(|e| CoreError::transient("discord", &e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CoreError::auth("discord bot token rejected"));
        }
        if !status.is_success() {
            return Err(CoreError::transient(
                "discord",
                &format!("channel list status {status}"),
            ));
        }

        let channels: Vec<Value> = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("discord channels: {e}")))?;

        let mut messages = Vec::new();
        for channel in &channels {
            let Some(channel_id) = channel.get("id").and_then(|v| v.as_str()) else {
                continue;
            };

            let result = self
                .http
                .get(format!("{}/channels/{channel_id}/messages", self.api_base))
                .header("Authorization", self.bot_auth(credentials))
                .query(&[("limit", "50")])
                .send()
                .await;

            let channel_messages: Vec<Value> = match result {
                Ok(resp) if resp.status().is_success() => match resp.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(channel_id, error = %e, "unparseable discord messages");
                        continue;
                    }
                },
                Ok(resp) => {
                    warn!(channel_id, status = %resp.status(), "failed to fetch discord channel");
                    continue;
                }
                Err(e) => {
                    warn!(channel_id, error = %e, "failed to fetch discord channel");
                    continue;
                }
            };

            for msg in channel_messages {
                let ts = msg
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .map(parse_timestamp)
                    .unwrap_or_else(Utc::now);
                if ts >= since {
                    let mut msg = msg;
                    msg["channel_id"] = json!(channel_id);
                    messages.push(msg);
                }
            }
        }

        info!(%user_id, count = messages.len(), "fetched discord messages");
        Ok(messages)
    }

    fn normalize(&self, raw: &Value, user_id: Uuid) -> CoreResult<MessageState> {
        let author = raw.get("author").cloned().unwrap_or_default();
        let username = author.get("username").and_then(|v| v.as_str());
        let name = author
            .get("global_name")
            .and_then(|v| v.as_str())
            .or(username)
            .unwrap_or("Unknown")
            .to_string();

        Ok(MessageState::new(
            user_id,
            Platform::Discord,
            raw.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
            raw.get("channel_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
            SenderProfile {
                id: author
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name,
                username: username.map(str::to_string),
                ..Default::default()
            },
            raw.get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
            raw.get("timestamp")
                .and_then(|v| v.as_str())
                .map(parse_timestamp)
                .unwrap_or_else(Utc::now),
        ))
    }

    async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        credentials: &Credentials,
        opts: &SendOptions,
    ) -> SendOutcome {
        let channel_id = opts
            .channel_id
            .clone()
            .unwrap_or_else(|| thread_id.to_string());

        let result = self
            .http
            .post(format!("{}/channels/{channel_id}/messages", self.api_base))
            .header("Authorization", self.bot_auth(credentials))
            .json(&json!({ "content": text }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) => {
                    info!(%channel_id, "sent discord message");
                    SendOutcome::sent(body.get("id").and_then(|v| v.as_str()).unwrap_or_default())
                }
                Err(e) => SendOutcome::failed(format!("unparseable send response: {e}")),
            },
            Ok(resp) => {
                let status = resp.status();
                let message = resp
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|b| b.get("message").and_then(|v| v.as_str()).map(str::to_string))
                    .unwrap_or_else(|| format!("status {status}"));
                error!(%channel_id, %status, "discord send failed");
                SendOutcome::failed(message)
            }
            Err(e) => {
                error!(%channel_id, error = %e, "discord send failed");
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
        // Realtime events arrive over the gateway socket, not HTTP
        // webhooks. The gateway task is started separately.
        info!(%user_id, "discord realtime uses the gateway socket");
        Ok(Some(format!("discord-gateway-{user_id}")))
    }

    async fn refresh_credentials(&self, credentials: &Credentials) -> CoreResult<Option<Credentials>> {
        let Some(refresh_token) = &credentials.refresh_token else {
            return Ok(None);
        };

        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CoreError::transient("discord", &e.to_string()))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "discord token refresh refused");
            return Ok(None);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("discord token response: {e}")))?;
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
            bot_token: credentials.bot_token.clone(),
        }))
    }
}

/// Identify payload sent after the gateway Hello.
fn identify_payload(bot_token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": bot_token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": "linux",
                "browser": "prism",
                "device": "prism",
            },
        },
    })
}

/// Persistent gateway connection. `MESSAGE_CREATE` dispatch payloads are
/// forwarded on the channel; the receiver feeds them into the webhook
/// ingest path.
pub struct DiscordGateway {
    gateway_url: String,
}

impl DiscordGateway {
    pub fn new() -> Self {
        Self {
            gateway_url: DISCORD_GATEWAY_URL.to_string(),
        }
    }

    /// Connect and listen until the channel's receiver is dropped.
    /// Reconnects with backoff (5s, then 10s) on connection loss.
    pub async fn run(&self, bot_token: String, events: mpsc::Sender<Value>) {
        let mut delay = Duration::from_secs(5);
        loop {
            match self.listen_once(&bot_token, &events).await {
                Ok(()) => {
                    warn!("discord gateway closed, reconnecting");
                    delay = Duration::from_secs(5);
                }
                Err(e) => {
                    error!(error = %e, "discord gateway error");
                    delay = Duration::from_secs(10);
                }
            }
            if events.is_closed() {
                info!("discord gateway consumer gone, stopping");
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn listen_once(
        &self,
        bot_token: &str,
        events: &mpsc::Sender<Value>,
    ) -> CoreResult<()> {
        let (stream, _) = connect_async(&self.gateway_url)
            .await
            .map_err(|e| CoreError::transient("discord-gateway", &e.to_string()))?;
        let (mut write, mut read) = stream.split();

        // Hello carries the heartbeat interval
        let hello = read
            .next()
            .await
            .ok_or_else(|| CoreError::transient("discord-gateway", "closed before hello"))?
            .map_err(|e| CoreError::transient("discord-gateway", &e.to_string()))?;
        let hello: Value = serde_json::from_str(hello.to_text().unwrap_or_default())
            .map_err(|e| CoreError::parse(format!("gateway hello: {e}")))?;

        if hello.get("op").and_then(|v| v.as_u64()) != Some(OP_HELLO) {
            return Err(CoreError::parse("gateway did not open with hello"));
        }
        let heartbeat_ms = hello
            .pointer("/d/heartbeat_interval")
            .and_then(|v| v.as_u64())
            .unwrap_or(41_250);

        write
            .send(WsMessage::Text(identify_payload(bot_token).to_string()))
            .await
            .map_err(|e| CoreError::transient("discord-gateway", &e.to_string()))?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    write
                        .send(WsMessage::Text(json!({ "op": OP_HEARTBEAT, "d": null }).to_string()))
                        .await
                        .map_err(|e| CoreError::transient("discord-gateway", &e.to_string()))?;
                }
                frame = read.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    let frame = frame
                        .map_err(|e| CoreError::transient("discord-gateway", &e.to_string()))?;
                    let Ok(text) = frame.to_text() else { continue };
                    let Ok(event) = serde_json::from_str::<Value>(text) else { continue };

                    if event.get("t").and_then(|v| v.as_str()) == Some("MESSAGE_CREATE") {
                        if let Some(dispatch) = event.get("d") {
                            if events.send(dispatch.clone()).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Default for DiscordGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> DiscordSettings {
        DiscordSettings {
            bot_token: "bot-token".to_string(),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_normalize_prefers_global_name() {
        let adapter = DiscordAdapter::new(settings()).unwrap();
        let raw = json!({
            "id": "112233",
            "channel_id": "445566",
            "content": "gg everyone",
            "timestamp": "2024-05-01T10:30:00+00:00",
            "author": { "id": "778899", "username": "frostbyte", "global_name": "Frost" },
        });
        let state = adapter.normalize(&raw, Uuid::new_v4()).unwrap();

        assert_eq!(state.platform_message_id, "112233");
        assert_eq!(state.thread_id, "445566");
        assert_eq!(state.sender.name, "Frost");
        assert_eq!(state.sender.username.as_deref(), Some("frostbyte"));
        assert_eq!(state.timestamp.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }

    #[test]
    fn test_normalize_username_fallback() {
        let adapter = DiscordAdapter::new(settings()).unwrap();
        let raw = json!({
            "id": "1",
            "channel_id": "2",
            "content": "hi",
            "timestamp": "2024-05-01T10:30:00+00:00",
            "author": { "id": "3", "username": "frostbyte" },
        });
        let state = adapter.normalize(&raw, Uuid::new_v4()).unwrap();
        assert_eq!(state.sender.name, "frostbyte");
    }

    #[tokio::test]
    async fn test_fetch_filters_old_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "C1", "type": 1 },
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/C1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "new", "timestamp": "2024-05-02T00:00:00+00:00", "author": {}, "content": "keep" },
                { "id": "old", "timestamp": "2024-01-01T00:00:00+00:00", "author": {}, "content": "drop" },
            ])))
            .mount(&server)
            .await;

        let adapter = DiscordAdapter::new(settings())
            .unwrap()
            .with_api_base(server.uri());
        let since = parse_timestamp("2024-05-01T00:00:00Z");
        let messages = adapter
            .fetch_new_messages(Uuid::new_v4(), since, &Credentials::default())
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], "new");
        assert_eq!(messages[0]["channel_id"], "C1");
    }

    #[test]
    fn test_identify_payload_shape() {
        let payload = identify_payload("tok");
        assert_eq!(payload["op"], OP_IDENTIFY);
        assert_eq!(payload["d"]["token"], "tok");
        assert_eq!(payload["d"]["intents"], GATEWAY_INTENTS);
    }
}
