//! In-process connection registry: the send-to-connection primitive.
//!
//! Maps live connection ids to their outbound channels. Purely local to one
//! gateway process; cross-process routing goes through the shared presence
//! store, which tells a relay *which* connection ids to target.

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use super::events::ServerEvent;

pub struct ConnectionRegistry {
    connections: DashMap<String, mpsc::UnboundedSender<ServerEvent>>,
    /// Connections tagged for admin dashboard broadcasts. A tag, not a
    /// presence-store concept.
    admins: DashSet<String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            admins: DashSet::new(),
        }
    }

    /// Attach a connection's outbound channel.
    pub fn add(&self, connection_id: &str, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.connections.insert(connection_id.to_string(), sender);
    }

    /// Detach a connection (and its admin tag, if any).
    pub fn remove(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        self.admins.remove(connection_id);
    }

    /// Push an event to one connection. Returns `false` when the connection
    /// is unknown or its channel has closed; delivery to one connection
    /// never aborts delivery to the rest, so the failure is logged here and
    /// swallowed.
    pub fn send_to(&self, connection_id: &str, event: ServerEvent) -> bool {
        match self.connections.get(connection_id) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    tracing::debug!(%connection_id, "outbound channel closed, skipping push");
                    return false;
                }
                true
            }
            None => {
                tracing::debug!(%connection_id, "connection not registered locally, skipping push");
                false
            }
        }
    }

    /// Push the same event to many connections. Returns how many pushes
    /// actually went out.
    pub fn send_to_many<'a>(
        &self,
        connection_ids: impl IntoIterator<Item = &'a str>,
        event: &ServerEvent,
    ) -> usize {
        connection_ids
            .into_iter()
            .filter(|id| self.send_to(id, event.clone()))
            .count()
    }

    pub fn tag_admin(&self, connection_id: &str) {
        self.admins.insert(connection_id.to_string());
    }

    pub fn admin_connections(&self) -> Vec<String> {
        self.admins.iter().map(|id| id.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
