use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

/// Durable post-hoc summary of one completed call. Written exactly once, at
/// call end, and only for calls associated with a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryRecord {
    pub caller_id: String,
    pub receiver_id: String,
    pub call_type: CallType,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Whole seconds, floored, never negative.
    pub duration: i64,
    pub chat_id: String,
}

impl CallHistoryRecord {
    /// Derives `duration` from the client-observed window. An `ended_at`
    /// before `started_at` clamps to zero.
    pub fn new(
        caller_id: impl Into<String>,
        receiver_id: impl Into<String>,
        call_type: CallType,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        chat_id: impl Into<String>,
    ) -> Self {
        let duration = (ended_at - started_at).num_seconds().max(0);
        Self {
            caller_id: caller_id.into(),
            receiver_id: receiver_id.into(),
            call_type,
            started_at,
            ended_at,
            duration,
            chat_id: chat_id.into(),
        }
    }
}
