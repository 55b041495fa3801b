//! Collaborator interfaces owned by the surrounding CRUD tier.
//!
//! The realtime core only constructs records and hands them off; user
//! profiles, notification storage, and call history live in the document
//! store behind these traits. In-memory implementations back tests and
//! single-process deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::RealtimeError;
use crate::models::{CallHistoryRecord, NotificationRecord, UserProfile};

/// Opaque user lookup. Unknown ids resolve to `None`, never an error.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, RealtimeError>;
}

/// Durable notification storage and its read paths.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn save(&self, record: &NotificationRecord) -> Result<(), RealtimeError>;
    async fn unread_count(&self, user_id: &str) -> Result<u64, RealtimeError>;
    async fn mark_all_read(&self, user_id: &str) -> Result<(), RealtimeError>;
    /// Pages are 1-based, newest first. Returns the next page number when
    /// more records remain.
    async fn paginate(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<NotificationRecord>, Option<u32>), RealtimeError>;
    async fn delete(&self, id: &str) -> Result<(), RealtimeError>;
}

/// Durable call history storage.
#[async_trait]
pub trait CallHistoryStore: Send + Sync {
    async fn save(&self, record: &CallHistoryRecord) -> Result<(), RealtimeError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<String, UserProfile>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        let directory = Self::new();
        for profile in profiles {
            directory.insert(profile);
        }
        directory
    }

    pub fn insert(&self, profile: UserProfile) {
        self.users.lock().insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, RealtimeError> {
        Ok(self.users.lock().get(user_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    records: Mutex<Vec<NotificationRecord>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything saved so far (test inspection).
    pub fn saved(&self) -> Vec<NotificationRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn save(&self, record: &NotificationRecord) -> Result<(), RealtimeError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64, RealtimeError> {
        let count = self
            .records
            .lock()
            .iter()
            .filter(|r| !r.is_read && r.recipient_ids.iter().any(|id| id == user_id))
            .count();
        Ok(count as u64)
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<(), RealtimeError> {
        for record in self.records.lock().iter_mut() {
            if record.recipient_ids.iter().any(|id| id == user_id) {
                record.is_read = true;
            }
        }
        Ok(())
    }

    async fn paginate(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<NotificationRecord>, Option<u32>), RealtimeError> {
        let page = page.max(1);
        let page_size = page_size.max(1) as usize;

        let mut matching: Vec<NotificationRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.recipient_ids.iter().any(|id| id == user_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let start = (page as usize - 1) * page_size;
        let items: Vec<NotificationRecord> =
            matching.iter().skip(start).take(page_size).cloned().collect();
        let next_page = if start + items.len() < matching.len() {
            Some(page + 1)
        } else {
            None
        };
        Ok((items, next_page))
    }

    async fn delete(&self, id: &str) -> Result<(), RealtimeError> {
        self.records.lock().retain(|r| r.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCallHistoryStore {
    records: Mutex<Vec<CallHistoryRecord>>,
}

impl MemoryCallHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<CallHistoryRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl CallHistoryStore for MemoryCallHistoryStore {
    async fn save(&self, record: &CallHistoryRecord) -> Result<(), RealtimeError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;

    fn record(sender: &str, recipients: &[&str]) -> NotificationRecord {
        NotificationRecord::new(
            sender,
            recipients.iter().map(|s| s.to_string()).collect(),
            NotificationKind::Like,
            "liked your post",
            Some("post_1".to_string()),
            None,
        )
    }

    #[tokio::test]
    async fn unread_count_and_mark_all_read() {
        let store = MemoryNotificationStore::new();
        store.save(&record("s", &["u1"])).await.unwrap();
        store.save(&record("s", &["u1", "u2"])).await.unwrap();
        store.save(&record("s", &["u2"])).await.unwrap();

        assert_eq!(store.unread_count("u1").await.unwrap(), 2);
        assert_eq!(store.unread_count("u2").await.unwrap(), 2);

        store.mark_all_read("u1").await.unwrap();
        assert_eq!(store.unread_count("u1").await.unwrap(), 0);
        // The shared record is addressed to u2 as well; the bulk read-all
        // flips the record, matching the single `isRead` flag model.
        assert_eq!(store.unread_count("u2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn paginate_newest_first_with_next_page() {
        let store = MemoryNotificationStore::new();
        for _ in 0..5 {
            store.save(&record("s", &["u1"])).await.unwrap();
        }

        let (first, next) = store.paginate("u1", 1, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(next, Some(2));
        assert!(first[0].created_at >= first[1].created_at);

        let (last, next) = store.paginate("u1", 3, 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn paginate_skips_other_recipients() {
        let store = MemoryNotificationStore::new();
        store.save(&record("s", &["u1"])).await.unwrap();
        store.save(&record("s", &["u2"])).await.unwrap();

        let (items, next) = store.paginate("u1", 1, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].recipient_ids, vec!["u1".to_string()]);
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn delete_removes_by_id() {
        let store = MemoryNotificationStore::new();
        let r = record("s", &["u1"]);
        store.save(&r).await.unwrap();
        store.delete(&r.id).await.unwrap();
        assert_eq!(store.unread_count("u1").await.unwrap(), 0);
    }
}
