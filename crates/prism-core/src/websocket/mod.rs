//! In-process WebSocket hub.
//!
//! Holds the per-user connection registry for the API process. Background
//! workers never touch this directly — they publish through the pub/sub
//! relay, which forwards into the hub.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Wire shape of every server→client event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsEnvelope {
    pub event: String,
    pub data: Value,
}

impl WsEnvelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"event\":\"error\"}".to_string())
    }
}

struct Connection {
    id: Uuid,
    sender: mpsc::UnboundedSender<String>,
}

/// Per-user WebSocket registry with push-to-user, broadcast, and
/// dead-connection pruning.
#[derive(Default)]
pub struct WsHub {
    connections: RwLock<HashMap<Uuid, Vec<Connection>>>,
}

impl WsHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new connection for a user. Returns the connection id
    /// used for later removal.
    pub async fn connect(&self, user_id: Uuid, sender: mpsc::UnboundedSender<String>) -> Uuid {
        let conn_id = Uuid::new_v4();
        let mut connections = self.connections.write().await;
        let list = connections.entry(user_id).or_default();
        list.push(Connection { id: conn_id, sender });
        info!(%user_id, total = list.len(), "websocket connected");
        conn_id
    }

    /// Remove a connection. Other connections for the same user continue.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(list) = connections.get_mut(&user_id) {
            list.retain(|c| c.id != conn_id);
            if list.is_empty() {
                connections.remove(&user_id);
            }
        }
        info!(%user_id, "websocket disconnected");
    }

    /// Push an event to every connection of a specific user. Connections
    /// whose channel is gone are pruned; the rest keep receiving.
    pub async fn push_to_user(&self, user_id: Uuid, event: &str, data: Value) {
        let payload = WsEnvelope::new(event, data).to_json();
        let mut connections = self.connections.write().await;
        if let Some(list) = connections.get_mut(&user_id) {
            list.retain(|c| c.sender.send(payload.clone()).is_ok());
            if list.is_empty() {
                connections.remove(&user_id);
            }
        }
        debug!(%user_id, event, "pushed event");
    }

    /// Broadcast an event to all connected users.
    pub async fn broadcast(&self, event: &str, data: Value) {
        let payload = WsEnvelope::new(event, data).to_json();
        let mut connections = self.connections.write().await;
        connections.retain(|_, list| {
            list.retain(|c| c.sender.send(payload.clone()).is_ok());
            !list.is_empty()
        });
    }

    pub async fn connected_users(&self) -> Vec<Uuid> {
        self.connections.read().await.keys().copied().collect()
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
