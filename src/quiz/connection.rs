use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use crate::error::{QuizError, Result};

/// One live transport connection: its outbound channel and the origin it
/// counts against.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub sender: mpsc::UnboundedSender<Message>,
    pub origin: IpAddr,
}

/// Tracks live connections and enforces the per-origin concurrency cap.
/// The origin counter map is mutated only under the write lock, keeping
/// the cap check race-free.
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
    origin_counts: Arc<RwLock<HashMap<IpAddr, usize>>>,
    max_per_origin: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_origin: usize) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            origin_counts: Arc::new(RwLock::new(HashMap::new())),
            max_per_origin,
        }
    }

    /// Mint a connection id for a fresh socket.
    pub fn generate_conn_id() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        format!("conn-{}", suffix)
    }

    /// Register a connection, rejecting it when the origin already holds
    /// the maximum number of live connections.
    pub async fn register(
        &self,
        conn_id: &str,
        origin: IpAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<()> {
        let mut counts = self.origin_counts.write().await;
        let count = counts.entry(origin).or_insert(0);
        if *count >= self.max_per_origin {
            tracing::warn!(origin = %origin, "Connection limit exceeded for origin");
            return Err(QuizError::CapacityExceeded(origin));
        }
        *count += 1;

        let mut connections = self.connections.write().await;
        connections.insert(conn_id.to_string(), ConnectionHandle { sender, origin });

        tracing::info!(conn_id = %conn_id, origin = %origin, "Connection registered");
        Ok(())
    }

    /// Drop a connection and decrement its origin counter, removing the
    /// counter entry once it reaches zero.
    pub async fn unregister(&self, conn_id: &str) {
        let handle = {
            let mut connections = self.connections.write().await;
            connections.remove(conn_id)
        };

        if let Some(handle) = handle {
            let mut counts = self.origin_counts.write().await;
            if let Some(count) = counts.get_mut(&handle.origin) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&handle.origin);
                }
            }
            tracing::info!(conn_id = %conn_id, "Connection unregistered");
        }
    }

    pub async fn sender(&self, conn_id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let connections = self.connections.read().await;
        connections.get(conn_id).map(|h| h.sender.clone())
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn origin_count(&self, origin: IpAddr) -> usize {
        let counts = self.origin_counts.read().await;
        counts.get(&origin).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_origin() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new(50);
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register("conn-1", test_origin(), tx).await.unwrap();
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.origin_count(test_origin()).await, 1);
        assert!(registry.sender("conn-1").await.is_some());

        registry.unregister("conn-1").await;
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.origin_count(test_origin()).await, 0);
        assert!(registry.sender("conn-1").await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_cap_per_origin() {
        let registry = ConnectionRegistry::new(50);

        for i in 0..50 {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry
                .register(&format!("conn-{}", i), test_origin(), tx)
                .await
                .unwrap();
        }

        // The 51st connection from the same origin is rejected
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = registry.register("conn-50", test_origin(), tx).await.unwrap_err();
        assert!(matches!(err, QuizError::CapacityExceeded(_)));
        assert!(registry.sender("conn-50").await.is_none());

        // A different origin is unaffected
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("conn-other", other, tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_capacity_freed_on_unregister() {
        let registry = ConnectionRegistry::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("conn-1", test_origin(), tx).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(registry.register("conn-2", test_origin(), tx).await.is_err());

        registry.unregister("conn-1").await;
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("conn-2", test_origin(), tx).await.unwrap();
    }

    #[test]
    fn test_generated_conn_ids_are_unique() {
        let a = ConnectionRegistry::generate_conn_id();
        let b = ConnectionRegistry::generate_conn_id();
        assert_ne!(a, b);
        assert!(a.starts_with("conn-"));
    }
}
