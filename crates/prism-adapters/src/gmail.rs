//! Gmail adapter — Gmail REST API over OAuth2.
//!
//! Polls `users/me/messages` with an `after:` query, fetches each message
//! in full, and walks MIME parts preferring `text/plain`. Realtime
//! delivery uses Gmail push notifications (`users/me/watch`).

use crate::registry::GmailSettings;
use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use prism_core::adapter::{Credentials, PlatformAdapter, SendOptions, SendOutcome};
use prism_core::errors::{CoreError, CoreResult};
use prism_core::message::{parse_timestamp, MessageState, Platform, SenderProfile};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FETCH_WINDOW: u32 = 50;

pub struct GmailAdapter {
    settings: GmailSettings,
    http: HttpClient,
    api_base: String,
    token_url: String,
}

impl GmailAdapter {
    pub fn new(settings: GmailSettings) -> CoreResult<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::configuration(format!("http client: {e}")))?;
        Ok(Self {
            settings,
            http,
            api_base: GMAIL_API_BASE.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_urls(mut self, api_base: String, token_url: String) -> Self {
        self.api_base = api_base;
        self.token_url = token_url;
        self
    }

    fn bearer(credentials: &Credentials) -> String {
        format!("Bearer {}", credentials.access_token)
    }
}

#[async_trait]
impl PlatformAdapter for GmailAdapter {
    fn platform(&self) -> Platform {
        Platform::Gmail
    }

    async fn fetch_new_messages(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        credentials: &Credentials,
    ) -> CoreResult<Vec<Value>> {
        let query = format!("after:{} in:inbox", since.timestamp());
        let response = self
            .http
            .get(format!("{}/users/me/messages", self.api_base))
            .header("Authorization", Self::bearer(credentials))
            .query(&[("q", query.as_str()), ("maxResults", "50")])
            .send()
            .await
            .map_err(|e| CoreError::transient("gmail", &e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CoreError::auth(format!("gmail list status {status}")));
        }
        if !status.is_success() {
            return Err(CoreError::transient(
                "gmail",
                &format!("list status {status}"),
            ));
        }

        let listing: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("gmail listing: {e}")))?;

        let refs = listing
            .get("messages")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        let mut messages = Vec::new();
        for message_ref in refs.iter().take(FETCH_WINDOW as usize) {
            let Some(id) = message_ref.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            match self
                .http
                .get(format!("{}/users/me/messages/{id}", self.api_base))
                .header("Authorization", Self::bearer(credentials))
                .query(&[("format", "full")])
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                    Ok(full) => messages.push(full),
                    Err(e) => warn!(message_id = id, error = %e, "unparseable gmail message"),
                },
                Ok(resp) => {
                    warn!(message_id = id, status = %resp.status(), "failed to fetch gmail message")
                }
                Err(e) => warn!(message_id = id, error = %e, "failed to fetch gmail message"),
            }
        }

        info!(%user_id, count = messages.len(), "fetched gmail messages");
        Ok(messages)
    }

    fn normalize(&self, raw: &Value, user_id: Uuid) -> CoreResult<MessageState> {
        let headers: HashMap<String, String> = raw
            .pointer("/payload/headers")
            .and_then(|h| h.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|h| {
                        Some((
                            h.get("name")?.as_str()?.to_lowercase(),
                            h.get("value")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let from_header = headers.get("from").cloned().unwrap_or_default();
        let sender_name = parse_display_name(&from_header);
        let sender_email = parse_email(&from_header);

        let body = raw
            .get("payload")
            .map(extract_body)
            .unwrap_or_else(|| "(no content)".to_string());

        let timestamp = headers
            .get("date")
            .map(|d| parse_timestamp(d))
            .unwrap_or_else(Utc::now);

        Ok(MessageState::new(
            user_id,
            Platform::Gmail,
            raw.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
            raw.get("threadId")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
            SenderProfile {
                id: sender_email.clone().unwrap_or_else(|| from_header.clone()),
                name: sender_name,
                email: sender_email,
                ..Default::default()
            },
            body,
            timestamp,
        ))
    }

    async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        credentials: &Credentials,
        opts: &SendOptions,
    ) -> SendOutcome {
        let to = opts.to_email.clone().unwrap_or_default();
        let subject = opts.subject.clone().unwrap_or_else(|| "Re: ".to_string());
        let mime = format!(
            "To: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{text}"
        );
        let raw = URL_SAFE.encode(mime.as_bytes());

        let result = self
            .http
            .post(format!("{}/users/me/messages/send", self.api_base))
            .header("Authorization", Self::bearer(credentials))
            .json(&json!({ "raw": raw, "threadId": thread_id }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) => {
                    info!(thread_id, "sent gmail message");
                    SendOutcome::sent(
                        body.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
                    )
                }
                Err(e) => SendOutcome::failed(format!("unparseable send response: {e}")),
            },
            Ok(resp) => {
                error!(thread_id, status = %resp.status(), "gmail send failed");
                SendOutcome::failed(format!("status {}", resp.status()))
            }
            Err(e) => {
                error!(thread_id, error = %e, "gmail send failed");
                SendOutcome::failed(e.to_string())
            }
        }
    }

    async fn setup_webhook(
        &self,
        user_id: Uuid,
        _webhook_url: &str,
        credentials: &Credentials,
    ) -> CoreResult<Option<String>> {
        let response = self
            .http
            .post(format!("{}/users/me/watch", self.api_base))
            .header("Authorization", Self::bearer(credentials))
            .json(&json!({
                "labelIds": ["INBOX"],
                "topicName": format!("projects/{}/topics/gmail-{user_id}", self.settings.pubsub_project),
            }))
            .send()
            .await
            .map_err(|e| CoreError::transient("gmail", &e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::permanent(
                "gmail",
                &format!("watch status {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("gmail watch response: {e}")))?;
        let history_id = body
            .get("historyId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        info!(%user_id, ?history_id, "gmail push registered");
        Ok(history_id)
    }

    async fn refresh_credentials(&self, credentials: &Credentials) -> CoreResult<Option<Credentials>> {
        let Some(refresh_token) = &credentials.refresh_token else {
            return Ok(None);
        };

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| CoreError::transient("gmail", &e.to_string()))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "gmail token refresh refused");
            return Ok(None);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("gmail token response: {e}")))?;
        let Some(access_token) = body.get("access_token").and_then(|v| v.as_str()) else {
            return Ok(None);
        };

        Ok(Some(Credentials {
            access_token: access_token.to_string(),
            refresh_token: Some(refresh_token.clone()),
            bot_token: None,
        }))
    }
}

/// Extract the display name from a `Name <email>` header.
fn parse_display_name(from_header: &str) -> String {
    if let Some(open) = from_header.find('<') {
        let name = from_header[..open].trim().trim_matches('"').trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    match from_header.split('@').next() {
        Some(local) if from_header.contains('@') => local.to_string(),
        _ => from_header.to_string(),
    }
}

/// Extract the address from a `Name <email>` header.
fn parse_email(from_header: &str) -> Option<String> {
    if let (Some(open), Some(close)) = (from_header.find('<'), from_header.find('>')) {
        if close > open {
            return Some(from_header[open + 1..close].to_string());
        }
    }
    if from_header.contains('@') {
        return Some(from_header.trim().to_string());
    }
    None
}

/// Walk the MIME payload preferring `text/plain` parts, one nesting level
/// deep, falling back to the snippet.
fn extract_body(payload: &Value) -> String {
    if let Some(text) = plain_text_of(payload) {
        return text;
    }

    if let Some(parts) = payload.get("parts").and_then(|p| p.as_array()) {
        for part in parts {
            if let Some(text) = plain_text_of(part) {
                return text;
            }
            if let Some(subparts) = part.get("parts").and_then(|p| p.as_array()) {
                for subpart in subparts {
                    if let Some(text) = plain_text_of(subpart) {
                        return text;
                    }
                }
            }
        }
    }

    payload
        .get("snippet")
        .and_then(|v| v.as_str())
        .unwrap_or("(no content)")
        .to_string()
}

fn plain_text_of(part: &Value) -> Option<String> {
    if part.get("mimeType").and_then(|v| v.as_str()) != Some("text/plain") {
        return None;
    }
    let data = part.pointer("/body/data")?.as_str()?;
    let bytes = URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
