//! Platform adapter contract.
//!
//! Every platform integration implements this trait. Adapters are
//! stateless singletons behind a registry keyed by lowercase platform
//! name; the registry is the only point that knows the concrete set of
//! supported platforms.

use crate::errors::CoreResult;
use crate::message::{MessageState, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Decrypted platform credentials. Instances live only on the stack of an
/// adapter call — never persisted, never logged.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Bot-token platforms (telegram, discord) carry the token here
    pub bot_token: Option<String>,
}

impl Credentials {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn bot(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: Some(bot_token.into()),
            ..Default::default()
        }
    }
}

/// Platform-specific hints for sending a reply.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub to_email: Option<String>,
    pub subject: Option<String>,
    pub channel_id: Option<String>,
    pub chat_id: Option<String>,
    pub reply_to_message_id: Option<String>,
}

/// Result of a send attempt through a platform API.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub ok: bool,
    pub platform_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn sent(platform_message_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            platform_message_id: Some(platform_message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            platform_message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Base interface for platform integrations.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// The platform this adapter serves.
    fn platform(&self) -> Platform;

    /// Fetch raw messages with `timestamp >= since`, bounded to a recent
    /// window. Per-channel failures are tolerated — the successfully
    /// retrieved subset is returned.
    async fn fetch_new_messages(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        credentials: &Credentials,
    ) -> CoreResult<Vec<Value>>;

    /// Convert a platform-specific raw payload into a unified
    /// `MessageState`.
    fn normalize(&self, raw: &Value, user_id: Uuid) -> CoreResult<MessageState>;

    /// Send a reply through the platform's API.
    async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        credentials: &Credentials,
        opts: &SendOptions,
    ) -> SendOutcome;

    /// Register a webhook for realtime message delivery. Platforms
    /// without per-user HTTP webhooks return a synthetic identifier.
    async fn setup_webhook(
        &self,
        user_id: Uuid,
        webhook_url: &str,
        credentials: &Credentials,
    ) -> CoreResult<Option<String>>;

    /// Refresh expired OAuth tokens. Returns rotated credentials, or None
    /// when the platform refuses.
    async fn refresh_credentials(&self, credentials: &Credentials) -> CoreResult<Option<Credentials>> {
        let _ = credentials;
        Ok(None)
    }
}
