//! Admin presence broadcaster: live online-count pushes for dashboards.

use std::sync::Arc;

use crate::error::RealtimeError;
use crate::store::presence::PresenceStore;

use super::events::ServerEvent;
use super::registry::ConnectionRegistry;

pub struct AdminBroadcaster {
    presence: Arc<dyn PresenceStore>,
    registry: Arc<ConnectionRegistry>,
}

impl AdminBroadcaster {
    pub fn new(presence: Arc<dyn PresenceStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { presence, registry }
    }

    /// Tag a connection for admin broadcasts and push the current count to
    /// it immediately, so dashboards render without waiting for the next
    /// presence change.
    pub async fn on_admin_join(&self, connection_id: &str) -> Result<(), RealtimeError> {
        self.registry.tag_admin(connection_id);
        self.send_count_to(connection_id).await
    }

    /// Push the current count to one connection (admin.refresh).
    pub async fn send_count_to(&self, connection_id: &str) -> Result<(), RealtimeError> {
        let count = self.presence.online_count().await?;
        self.registry
            .send_to(connection_id, ServerEvent::OnlineCount { count });
        Ok(())
    }

    /// Push the current count to every admin-tagged connection. Invoked
    /// after every presence-mutating event so dashboards stay live without
    /// polling.
    pub async fn broadcast_online_count(&self) -> Result<(), RealtimeError> {
        let admins = self.registry.admin_connections();
        if admins.is_empty() {
            return Ok(());
        }
        let count = self.presence.online_count().await?;
        let event = ServerEvent::OnlineCount { count };
        let sent = self
            .registry
            .send_to_many(admins.iter().map(String::as_str), &event);
        tracing::debug!(count, admins = admins.len(), sent, "broadcast online count");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::models::UserProfile;
    use crate::store::presence::MemoryPresenceStore;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn join_pushes_current_count_immediately() {
        let presence = Arc::new(MemoryPresenceStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = AdminBroadcaster::new(presence.clone(), registry.clone());

        for i in 0..3 {
            presence
                .register_connection(&UserProfile::new(format!("u{i}"), "u"), &format!("c{i}"))
                .await
                .unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add("admin1", tx);
        broadcaster.on_admin_join("admin1").await.unwrap();

        assert_eq!(drain(&mut rx), vec![ServerEvent::OnlineCount { count: 3 }]);
    }

    #[tokio::test]
    async fn every_admin_sees_each_count_transition() {
        let presence = Arc::new(MemoryPresenceStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = AdminBroadcaster::new(presence.clone(), registry.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.add("admin_a", tx_a);
        registry.add("admin_b", tx_b);
        broadcaster.on_admin_join("admin_a").await.unwrap();
        broadcaster.on_admin_join("admin_b").await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        // Two users connect, then one disconnects; a broadcast follows each
        // mutation, as the gateway does.
        presence
            .register_connection(&UserProfile::new("u1", "u1"), "c1")
            .await
            .unwrap();
        broadcaster.broadcast_online_count().await.unwrap();
        presence
            .register_connection(&UserProfile::new("u2", "u2"), "c2")
            .await
            .unwrap();
        broadcaster.broadcast_online_count().await.unwrap();
        presence.unregister_connection("c2").await.unwrap();
        broadcaster.broadcast_online_count().await.unwrap();

        let expected = vec![
            ServerEvent::OnlineCount { count: 1 },
            ServerEvent::OnlineCount { count: 2 },
            ServerEvent::OnlineCount { count: 1 },
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
    }

    #[tokio::test]
    async fn non_admin_connections_never_receive_counts() {
        let presence = Arc::new(MemoryPresenceStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = AdminBroadcaster::new(presence.clone(), registry.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add("c1", tx);

        broadcaster.broadcast_online_count().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}
