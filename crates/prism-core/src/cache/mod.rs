//! Redis cache for feeds, threads, contacts, sync markers and rate
//! limiting.
//!
//! Key patterns:
//!   feed:{user_id}                      TTL 30s
//!   thread:{platform}:{thread_id}       TTL 5min
//!   contact:{user_id}:{platform}:{id}   TTL 1h
//!   sync:{user_id}:{platform}           TTL 24h
//!   rate:{user_id}:{endpoint}           TTL 60s

use crate::errors::{CoreError, CoreResult};
use redis::{aio::ConnectionManager, AsyncCommands, Client as RedisClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub const FEED_TTL: u64 = 30;
pub const THREAD_TTL: u64 = 300;
pub const CONTACT_TTL: u64 = 3600;
pub const SYNC_TTL: u64 = 86_400;
pub const RATE_WINDOW: i64 = 60;

fn feed_key(user_id: &str) -> String {
    format!("feed:{user_id}")
}

fn thread_key(platform: &str, thread_id: &str) -> String {
    format!("thread:{platform}:{thread_id}")
}

fn contact_key(user_id: &str, platform: &str, contact_id: &str) -> String {
    format!("contact:{user_id}:{platform}:{contact_id}")
}

fn sync_key(user_id: &str, platform: &str) -> String {
    format!("sync:{user_id}:{platform}")
}

fn rate_key(user_id: &str, endpoint: &str) -> String {
    format!("rate:{user_id}:{endpoint}")
}

/// High-level caching operations.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| CoreError::configuration(format!("redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    // --- Generic ---

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: u64) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        conn.set_ex(key, raw, ttl)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del(key)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))
    }

    // --- Feed cache ---

    pub async fn get_feed<T: DeserializeOwned>(&self, user_id: &str) -> CoreResult<Option<T>> {
        self.get_json(&feed_key(user_id)).await
    }

    pub async fn set_feed<T: Serialize>(&self, user_id: &str, feed: &T) -> CoreResult<()> {
        self.set_json(&feed_key(user_id), feed, FEED_TTL).await
    }

    pub async fn invalidate_feed(&self, user_id: &str) -> CoreResult<()> {
        debug!(user_id, "feed cache invalidated");
        self.delete(&feed_key(user_id)).await
    }

    // --- Thread cache ---

    pub async fn get_thread<T: DeserializeOwned>(
        &self,
        platform: &str,
        thread_id: &str,
    ) -> CoreResult<Option<T>> {
        self.get_json(&thread_key(platform, thread_id)).await
    }

    pub async fn set_thread<T: Serialize>(
        &self,
        platform: &str,
        thread_id: &str,
        thread: &T,
    ) -> CoreResult<()> {
        self.set_json(&thread_key(platform, thread_id), thread, THREAD_TTL)
            .await
    }

    pub async fn invalidate_thread(&self, platform: &str, thread_id: &str) -> CoreResult<()> {
        self.delete(&thread_key(platform, thread_id)).await
    }

    // --- Contact cache ---

    pub async fn get_contact<T: DeserializeOwned>(
        &self,
        user_id: &str,
        platform: &str,
        contact_id: &str,
    ) -> CoreResult<Option<T>> {
        self.get_json(&contact_key(user_id, platform, contact_id)).await
    }

    pub async fn set_contact<T: Serialize>(
        &self,
        user_id: &str,
        platform: &str,
        contact_id: &str,
        contact: &T,
    ) -> CoreResult<()> {
        self.set_json(&contact_key(user_id, platform, contact_id), contact, CONTACT_TTL)
            .await
    }

    // --- Sync markers ---

    pub async fn get_last_sync(&self, user_id: &str, platform: &str) -> CoreResult<Option<String>> {
        self.get_json(&sync_key(user_id, platform)).await
    }

    pub async fn set_last_sync(
        &self,
        user_id: &str,
        platform: &str,
        timestamp: &str,
    ) -> CoreResult<()> {
        self.set_json(&sync_key(user_id, platform), &timestamp, SYNC_TTL)
            .await
    }

    // --- Rate limiting ---

    /// INCR + EXPIRE rate limit check. Returns true when the request is
    /// allowed, false when the caller has exhausted the window.
    pub async fn check_rate_limit(
        &self,
        user_id: &str,
        endpoint: &str,
        limit: u32,
    ) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let key = rate_key(user_id, endpoint);

        let current: Option<u32> = conn
            .get(&key)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
        if current.unwrap_or(0) >= limit {
            return Ok(false);
        }

        let _: () = redis::pipe()
            .atomic()
            .incr(&key, 1u32)
            .expire(&key, RATE_WINDOW)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
        Ok(true)
    }
}
