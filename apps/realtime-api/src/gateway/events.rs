//! Wire-format events: the closed set of tagged message variants exchanged
//! with clients over the gateway.
//!
//! Every frame is `{"event": "<dotted name>", "data": {...}}`. Unknown or
//! malformed inbound frames are logged and dropped by the server loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CallType, NotificationKind, UserProfile};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "presence.register", rename_all = "camelCase")]
    PresenceRegister { user_id: String },

    #[serde(rename = "presence.registerAuxiliary", rename_all = "camelCase")]
    PresenceRegisterAuxiliary { user_id: String, channel: String },

    #[serde(rename = "presence.listOnline")]
    PresenceListOnline {},

    #[serde(rename = "call.offer", rename_all = "camelCase")]
    CallOffer {
        from: String,
        to: String,
        offer: Value,
        call_type: CallType,
    },

    #[serde(rename = "call.answer", rename_all = "camelCase")]
    CallAnswer {
        from: String,
        to: String,
        answer: Value,
        call_type: CallType,
    },

    #[serde(rename = "call.ice", rename_all = "camelCase")]
    CallIce {
        from: String,
        to: String,
        candidate: Value,
    },

    #[serde(rename = "call.end", rename_all = "camelCase")]
    CallEnd {
        from: String,
        to: String,
        call_type: CallType,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        #[serde(default)]
        chat_id: Option<String>,
    },

    #[serde(rename = "call.toggleMic", rename_all = "camelCase")]
    CallToggleMic { to: String, mic_on: bool },

    #[serde(rename = "call.toggleVideo", rename_all = "camelCase")]
    CallToggleVideo { to: String, video_on: bool },

    #[serde(rename = "notify.send", rename_all = "camelCase")]
    NotifySend {
        sender_id: String,
        recipient_ids: Vec<String>,
        #[serde(rename = "type")]
        kind: NotificationKind,
        message: String,
        #[serde(default)]
        related_post_id: Option<String>,
        #[serde(default)]
        related_group_id: Option<String>,
        #[serde(default)]
        sender_name: Option<String>,
    },

    #[serde(rename = "admin.join")]
    AdminJoin {},

    #[serde(rename = "admin.refresh")]
    AdminRefresh {},
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "presence.onlineList", rename_all = "camelCase")]
    OnlineList { user_ids: Vec<String> },

    #[serde(rename = "presence.onlineCount")]
    OnlineCount { count: usize },

    #[serde(rename = "notification.new", rename_all = "camelCase")]
    NotificationNew {
        #[serde(rename = "type")]
        kind: NotificationKind,
        message: String,
        sender_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        recipient_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        related_post_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        related_group_id: Option<String>,
        is_read: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "call.incoming", rename_all = "camelCase")]
    CallIncoming {
        from: String,
        offer: Value,
        call_type: CallType,
        caller: UserProfile,
    },

    #[serde(rename = "call.accepted", rename_all = "camelCase")]
    CallAccepted {
        from: String,
        answer: Value,
        call_type: CallType,
    },

    #[serde(rename = "call.iceReceived", rename_all = "camelCase")]
    CallIceReceived { from: String, candidate: Value },

    #[serde(rename = "call.ended", rename_all = "camelCase")]
    CallEnded { from: String, call_type: CallType },

    #[serde(rename = "call.micToggled", rename_all = "camelCase")]
    CallMicToggled { mic_on: bool },

    #[serde(rename = "call.videoToggled", rename_all = "camelCase")]
    CallVideoToggled { video_on: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_offer() {
        let raw = serde_json::json!({
            "event": "call.offer",
            "data": {
                "from": "u1",
                "to": "u2",
                "offer": { "sdp": "v=0" },
                "callType": "video"
            }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::CallOffer {
                from,
                to,
                call_type,
                ..
            } => {
                assert_eq!(from, "u1");
                assert_eq!(to, "u2");
                assert_eq!(call_type, CallType::Video);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parses_call_end_without_chat_id() {
        let raw = serde_json::json!({
            "event": "call.end",
            "data": {
                "from": "u1",
                "to": "u2",
                "callType": "voice",
                "startedAt": "2026-01-01T10:00:00Z",
                "endedAt": "2026-01-01T10:02:05Z"
            }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::CallEnd { chat_id, .. } => assert!(chat_id.is_none()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parses_notify_send_with_kebab_case_type() {
        let raw = serde_json::json!({
            "event": "notify.send",
            "data": {
                "senderId": "u1",
                "recipientIds": ["u2", "u3"],
                "type": "group-add",
                "message": "added you to a group",
                "relatedGroupId": "grp_1"
            }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::NotifySend {
                kind,
                recipient_ids,
                related_group_id,
                sender_name,
                ..
            } => {
                assert_eq!(kind, NotificationKind::GroupAdd);
                assert_eq!(recipient_ids.len(), 2);
                assert_eq!(related_group_id.as_deref(), Some("grp_1"));
                assert!(sender_name.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event_name() {
        let raw = serde_json::json!({ "event": "presence.bogus", "data": {} });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn serializes_online_count_with_dotted_name() {
        let value = serde_json::to_value(ServerEvent::OnlineCount { count: 3 }).unwrap();
        assert_eq!(value["event"], "presence.onlineCount");
        assert_eq!(value["data"]["count"], 3);
    }

    #[test]
    fn serializes_notification_new_payload_shape() {
        let value = serde_json::to_value(ServerEvent::NotificationNew {
            kind: NotificationKind::Like,
            message: "liked your post".to_string(),
            sender_id: "u1".to_string(),
            sender_name: None,
            recipient_id: "u2".to_string(),
            related_post_id: Some("post_9".to_string()),
            related_group_id: None,
            is_read: false,
            timestamp: Utc::now(),
        })
        .unwrap();

        assert_eq!(value["event"], "notification.new");
        let data = &value["data"];
        assert_eq!(data["type"], "like");
        assert_eq!(data["senderId"], "u1");
        assert_eq!(data["recipientId"], "u2");
        assert_eq!(data["relatedPostId"], "post_9");
        assert_eq!(data["isRead"], false);
        assert!(data.get("senderName").is_none());
        assert!(data.get("relatedGroupId").is_none());
    }
}
