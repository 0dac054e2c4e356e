//! Redis pub/sub bridge for cross-process WebSocket notifications.
//!
//! Background workers run in separate processes and cannot reach the API
//! process's in-memory hub. Workers publish events to Redis channels; the
//! API process runs a relay that subscribes and forwards into the hub.
//!
//! Channels:
//!   ws:user:{user_id}  — events targeted at a specific user
//!   ws:broadcast       — events for all connected users

use crate::errors::{CoreError, CoreResult};
use crate::websocket::{WsEnvelope, WsHub};
use futures_util::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands, Client as RedisClient};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const BROADCAST_CHANNEL: &str = "ws:broadcast";
const USER_CHANNEL_PREFIX: &str = "ws:user:";
const USER_CHANNEL_PATTERN: &str = "ws:user:*";

fn user_channel(user_id: Uuid) -> String {
    format!("{USER_CHANNEL_PREFIX}{user_id}")
}

/// Publishes WebSocket events onto the bus. Safe to clone and share; one
/// underlying connection per process.
#[derive(Clone)]
pub struct EventPublisher {
    conn: ConnectionManager,
}

impl EventPublisher {
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

    /// Publish an event for a specific user. Failures are logged by the
    /// caller's choice — losing a push is acceptable (at-least-once
    /// overall, clients reconcile via the feed).
    pub async fn publish_to_user(&self, user_id: Uuid, event: &str, data: Value) -> CoreResult<()> {
        let payload = WsEnvelope::new(event, data).to_json();
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(user_channel(user_id), payload)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
        debug!(%user_id, event, "published user event");
        Ok(())
    }

    /// Publish a broadcast event for all connected users.
    pub async fn publish_broadcast(&self, event: &str, data: Value) -> CoreResult<()> {
        let payload = WsEnvelope::new(event, data).to_json();
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(BROADCAST_CHANNEL, payload)
            .await
            .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
        Ok(())
    }
}

/// Run the pub/sub relay for the process lifetime: subscribe to the
/// broadcast channel and the user-channel pattern, and forward every
/// inbound payload into the hub. Reconnects with backoff on failure;
/// cancellation on shutdown is cooperative (abort at any await point).
pub async fn run_relay(redis_url: String, hub: Arc<WsHub>) {
    let mut delay = Duration::from_secs(5);
    loop {
        match relay_once(&redis_url, &hub).await {
            Ok(()) => {
                warn!("pub/sub relay stream ended, reconnecting");
                delay = Duration::from_secs(5);
            }
            Err(e) => {
                warn!(error = %e, "pub/sub relay error, reconnecting in {delay:?}");
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(10));
    }
}

async fn relay_once(redis_url: &str, hub: &Arc<WsHub>) -> CoreResult<()> {
    let client = RedisClient::open(redis_url)
        .map_err(|e| CoreError::configuration(format!("redis client: {e}")))?;
    let conn = client
        .get_async_connection()
        .await
        .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
    let mut pubsub = conn.into_pubsub();

    pubsub
        .subscribe(BROADCAST_CHANNEL)
        .await
        .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
    pubsub
        .psubscribe(USER_CHANNEL_PATTERN)
        .await
        .map_err(|e| CoreError::transient("redis", &e.to_string()))?;
    info!("pub/sub relay subscribed (broadcast + user channels)");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(channel, error = %e, "unreadable pub/sub payload");
                continue;
            }
        };

        match serde_json::from_str::<WsEnvelope>(&payload) {
            Ok(envelope) => route(hub, &channel, envelope).await,
            Err(e) => warn!(channel, error = %e, "invalid pub/sub message"),
        }
    }

    Ok(())
}

async fn route(hub: &Arc<WsHub>, channel: &str, envelope: WsEnvelope) {
    if let Some(raw_user) = channel.strip_prefix(USER_CHANNEL_PREFIX) {
        match raw_user.parse::<Uuid>() {
            Ok(user_id) => hub.push_to_user(user_id, &envelope.event, envelope.data).await,
            Err(_) => warn!(channel, "user channel with non-uuid suffix"),
        }
    } else {
        hub.broadcast(&envelope.event, envelope.data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_user_channel_format() {
        let id = Uuid::nil();
        assert_eq!(
            user_channel(id),
            "ws:user:00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn test_route_user_channel_targets_user() {
        let hub = WsHub::new();
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.connect(user, tx).await;

        route(
            &hub,
            &format!("ws:user:{user}"),
            WsEnvelope::new("new_message", json!({"id": "m1"})),
        )
        .await;

        let payload: WsEnvelope = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(payload.event, "new_message");
    }

    #[tokio::test]
    async fn test_route_broadcast_channel_fans_out() {
        let hub = WsHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.connect(Uuid::new_v4(), tx).await;

        route(
            &hub,
            BROADCAST_CHANNEL,
            WsEnvelope::new("sync_status", json!({"status": "syncing"})),
        )
        .await;

        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_route_bad_user_suffix_is_dropped() {
        let hub = WsHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.connect(Uuid::new_v4(), tx).await;

        route(
            &hub,
            "ws:user:not-a-uuid",
            WsEnvelope::new("new_message", json!({})),
        )
        .await;

        assert!(rx.try_recv().is_err());
    }
}
