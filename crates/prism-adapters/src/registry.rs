//! Adapter registry — the single point that knows which platforms are
//! supported. Adapters are stateless singletons built once at startup and
//! looked up by lowercase platform name.

use crate::discord::DiscordAdapter;
use crate::gmail::GmailAdapter;
use crate::slack::SlackAdapter;
use crate::telegram::TelegramAdapter;
use prism_core::adapter::PlatformAdapter;
use prism_core::errors::CoreResult;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct GmailSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Cloud project owning the Gmail push topics
    pub pubsub_project: String,
}

#[derive(Debug, Clone, Default)]
pub struct SlackSettings {
    pub client_id: String,
    pub client_secret: String,
    pub signing_secret: String,
}

#[derive(Debug, Clone, Default)]
pub struct TelegramSettings {
    pub bot_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordSettings {
    pub bot_token: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Per-platform configuration the registry is built from.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub gmail: GmailSettings,
    pub slack: SlackSettings,
    pub telegram: TelegramSettings,
    pub discord: DiscordSettings,
}

/// Registry of adapter singletons keyed by lowercase platform name.
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new(settings: AdapterSettings) -> CoreResult<Self> {
        let mut adapters: HashMap<&'static str, Arc<dyn PlatformAdapter>> = HashMap::new();
        adapters.insert("gmail", Arc::new(GmailAdapter::new(settings.gmail)?));
        adapters.insert("slack", Arc::new(SlackAdapter::new(settings.slack)?));
        adapters.insert("telegram", Arc::new(TelegramAdapter::new(settings.telegram)?));
        adapters.insert("discord", Arc::new(DiscordAdapter::new(settings.discord)?));
        Ok(Self { adapters })
    }

    /// Look up the adapter for a platform name (case-insensitive).
    pub fn get(&self, platform: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(platform.to_lowercase().as_str()).cloned()
    }

    /// The concrete set of supported platforms.
    pub fn supported_platforms(&self) -> Vec<&'static str> {
        let mut platforms: Vec<&'static str> = self.adapters.keys().copied().collect();
        platforms.sort_unstable();
        platforms
    }

    pub fn is_supported(&self, platform: &str) -> bool {
        self.adapters.contains_key(platform.to_lowercase().as_str())
    }
}
