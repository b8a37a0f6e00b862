use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use warp::ws::Message;

use super::connection::ConnectionRegistry;
use super::protocol::ServerMessage;
use crate::error::Result;

/// Fan-out of server events to room broadcast groups and targeted replies
/// to single connections. The only component that touches the transport.
///
/// Delivery is at-most-once: a dead or lagging sender is skipped, and the
/// client recovers by requesting a fresh room snapshot on reconnect. Each
/// connection's unbounded channel preserves the order events were pushed.
pub struct BroadcastGateway {
    registry: Arc<ConnectionRegistry>,
    groups: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl BroadcastGateway {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            groups: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe a connection to a room's broadcast group.
    pub async fn join_group(&self, room_code: &str, conn_id: &str) {
        let mut groups = self.groups.write().await;
        groups
            .entry(room_code.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    /// Unsubscribe a connection, dropping the group once empty.
    pub async fn leave_group(&self, room_code: &str, conn_id: &str) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(room_code) {
            members.remove(conn_id);
            if members.is_empty() {
                groups.remove(room_code);
            }
        }
    }

    /// Remove a connection from every group it is subscribed to.
    pub async fn leave_all_groups(&self, conn_id: &str) {
        let mut groups = self.groups.write().await;
        groups.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
    }

    /// Drop an entire group (room teardown).
    pub async fn drop_group(&self, room_code: &str) {
        let mut groups = self.groups.write().await;
        groups.remove(room_code);
    }

    /// Deliver an event to every connection subscribed to the room.
    pub async fn to_room(&self, room_code: &str, message: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;

        let members: Vec<String> = {
            let groups = self.groups.read().await;
            groups
                .get(room_code)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default()
        };

        for conn_id in members {
            if let Some(sender) = self.registry.sender(&conn_id).await {
                if sender.send(Message::text(text.clone())).is_err() {
                    tracing::debug!(
                        conn_id = %conn_id,
                        room_code = %room_code,
                        "Dropping event for closed connection"
                    );
                }
            }
        }

        Ok(())
    }

    /// Deliver an event to exactly one connection.
    pub async fn to_connection(&self, conn_id: &str, message: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        if let Some(sender) = self.registry.sender(conn_id).await {
            if sender.send(Message::text(text)).is_err() {
                tracing::debug!(conn_id = %conn_id, "Dropping event for closed connection");
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn group_size(&self, room_code: &str) -> usize {
        let groups = self.groups.read().await;
        groups.get(room_code).map(|m| m.len()).unwrap_or(0)
    }
}
