use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use linkfeed_common::id::{prefix, prefixed_ulid};

/// The closed set of notification types the platform emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Follow,
    Unfollow,
    Like,
    Comment,
    Mention,
    Post,
    Reply,
    GroupAdd,
}

/// Durable fact of a notification, addressed to one or more recipients.
///
/// Created exactly once per fan-out request regardless of how many
/// recipients (or how many of their connections) are online. Only mutated by
/// bulk mark-as-read; never deleted by this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_ids: Vec<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_group_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(
        sender_id: impl Into<String>,
        recipient_ids: Vec<String>,
        kind: NotificationKind,
        message: impl Into<String>,
        related_post_id: Option<String>,
        related_group_id: Option<String>,
    ) -> Self {
        Self {
            id: prefixed_ulid(prefix::NOTIFICATION),
            sender_id: sender_id.into(),
            recipient_ids,
            kind,
            message: message.into(),
            related_post_id,
            related_group_id,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}
