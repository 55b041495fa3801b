//! Notification fan-out: one durable record per request, one live push per
//! live connection of each online recipient.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::RealtimeError;
use crate::models::{NotificationKind, NotificationRecord};
use crate::store::external::{NotificationStore, UserDirectory};
use crate::store::presence::PresenceStore;

use super::events::ServerEvent;
use super::registry::ConnectionRegistry;

/// One fan-out request, as carried by `notify.send`.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub sender_id: String,
    pub recipient_ids: Vec<String>,
    pub kind: NotificationKind,
    pub message: String,
    pub related_post_id: Option<String>,
    pub related_group_id: Option<String>,
    /// Display name attached to the live push only; never persisted.
    pub sender_name: Option<String>,
}

pub struct NotificationService {
    presence: Arc<dyn PresenceStore>,
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn NotificationStore>,
    registry: Arc<ConnectionRegistry>,
}

impl NotificationService {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn NotificationStore>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            presence,
            directory,
            store,
            registry,
        }
    }

    /// Persist one notification record for the resolved recipient set, then
    /// push a live event to every open connection of each online recipient.
    ///
    /// Recipient ids that don't resolve in the user directory are silently
    /// dropped (callers may hold stale ids). An empty resolved set is a
    /// complete no-op: no record, no push. A persistence failure aborts
    /// before any push happens; a push failure for one connection never
    /// aborts the rest.
    pub async fn notify(&self, request: NotifyRequest) -> Result<(), RealtimeError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for recipient_id in &request.recipient_ids {
            if !seen.insert(recipient_id.clone()) {
                continue;
            }
            match self.directory.lookup(recipient_id).await? {
                Some(_) => resolved.push(recipient_id.clone()),
                None => {
                    tracing::debug!(recipient_id = %recipient_id, "dropping unknown notification recipient");
                }
            }
        }

        if resolved.is_empty() {
            tracing::debug!(sender_id = %request.sender_id, "no resolvable recipients, skipping notification");
            return Ok(());
        }

        let record = NotificationRecord::new(
            &request.sender_id,
            resolved.clone(),
            request.kind,
            &request.message,
            request.related_post_id.clone(),
            request.related_group_id.clone(),
        );
        self.store.save(&record).await?;

        let timestamp = Utc::now();
        let mut pushed = 0usize;
        for recipient_id in &resolved {
            let connections = match self.presence.connections(recipient_id).await {
                Ok(connections) => connections,
                Err(err) => {
                    tracing::warn!(recipient_id = %recipient_id, %err, "presence lookup failed, skipping recipient push");
                    continue;
                }
            };
            if connections.is_empty() {
                // Offline recipient: the record stays retrievable through
                // the paginated read path.
                continue;
            }

            let event = ServerEvent::NotificationNew {
                kind: request.kind,
                message: request.message.clone(),
                sender_id: request.sender_id.clone(),
                sender_name: request.sender_name.clone(),
                recipient_id: recipient_id.clone(),
                related_post_id: request.related_post_id.clone(),
                related_group_id: request.related_group_id.clone(),
                is_read: false,
                timestamp,
            };
            pushed += self
                .registry
                .send_to_many(connections.iter().map(String::as_str), &event);
        }

        tracing::debug!(
            notification_id = %record.id,
            recipients = resolved.len(),
            pushed,
            "notification fan-out complete"
        );
        Ok(())
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<u64, RealtimeError> {
        self.store.unread_count(user_id).await
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Result<(), RealtimeError> {
        self.store.mark_all_read(user_id).await
    }

    pub async fn list(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<NotificationRecord>, Option<u32>), RealtimeError> {
        self.store.paginate(user_id, page, page_size).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), RealtimeError> {
        self.store.delete(id).await
    }
}
