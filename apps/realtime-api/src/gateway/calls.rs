//! Call signaling relay: blind forwarding of WebRTC negotiation and control
//! messages between two users' live connections.
//!
//! The relay holds no session state; every message carries full routing
//! information, so relay instances are stateless and horizontally scalable.
//! Transition legality (an answer with no prior offer, etc.) is not enforced
//! here; it is forwarded as-is and left to the client layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::RealtimeError;
use crate::models::{CallHistoryRecord, CallType, UserProfile};
use crate::store::external::{CallHistoryStore, UserDirectory};
use crate::store::presence::PresenceStore;

use super::events::ServerEvent;
use super::registry::ConnectionRegistry;

pub struct CallRelay {
    presence: Arc<dyn PresenceStore>,
    directory: Arc<dyn UserDirectory>,
    history: Arc<dyn CallHistoryStore>,
    registry: Arc<ConnectionRegistry>,
}

impl CallRelay {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        directory: Arc<dyn UserDirectory>,
        history: Arc<dyn CallHistoryStore>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            presence,
            directory,
            history,
            registry,
        }
    }

    /// Push an event to every live connection of `to`. An offline target is
    /// a silent drop: the caller times out client-side, and no synthetic
    /// "user offline" event is generated. Returns the number of pushes.
    async fn push_to_user(&self, to: &str, event: ServerEvent) -> Result<usize, RealtimeError> {
        let connections = self.presence.connections(to).await?;
        if connections.is_empty() {
            tracing::debug!(target_id = %to, "signaling target offline, dropping event");
            return Ok(0);
        }
        Ok(self
            .registry
            .send_to_many(connections.iter().map(String::as_str), &event))
    }

    /// Forward an offer as `call.incoming`, enriched with the caller's
    /// public profile so callee devices can render the ring screen.
    pub async fn relay_offer(
        &self,
        from: &str,
        to: &str,
        offer: Value,
        call_type: CallType,
    ) -> Result<(), RealtimeError> {
        let caller = match self.directory.lookup(from).await? {
            Some(profile) => profile,
            None => {
                // Caller id unknown to the directory; forward with a bare
                // profile rather than dropping the ring.
                tracing::warn!(caller_id = %from, "caller not found in directory");
                UserProfile::new(from, from)
            }
        };
        self.push_to_user(
            to,
            ServerEvent::CallIncoming {
                from: from.to_string(),
                offer,
                call_type,
                caller,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn relay_answer(
        &self,
        from: &str,
        to: &str,
        answer: Value,
        call_type: CallType,
    ) -> Result<(), RealtimeError> {
        self.push_to_user(
            to,
            ServerEvent::CallAccepted {
                from: from.to_string(),
                answer,
                call_type,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn relay_ice_candidate(
        &self,
        from: &str,
        to: &str,
        candidate: Value,
    ) -> Result<(), RealtimeError> {
        self.push_to_user(
            to,
            ServerEvent::CallIceReceived {
                from: from.to_string(),
                candidate,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn relay_mic_toggle(&self, to: &str, mic_on: bool) -> Result<(), RealtimeError> {
        self.push_to_user(to, ServerEvent::CallMicToggled { mic_on })
            .await?;
        Ok(())
    }

    pub async fn relay_video_toggle(&self, to: &str, video_on: bool) -> Result<(), RealtimeError> {
        self.push_to_user(to, ServerEvent::CallVideoToggled { video_on })
            .await?;
        Ok(())
    }

    /// Notify the peer that the call ended, then record history exactly once.
    ///
    /// The `call.ended` push happens first and is never rolled back: once the
    /// peer has been notified, a history-write failure is logged and
    /// swallowed so the event cannot be duplicated by a retry. Calls without
    /// a chat id are not logged at all (ad-hoc calls carry no history).
    pub async fn end_call(
        &self,
        from: &str,
        to: &str,
        call_type: CallType,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        chat_id: Option<String>,
    ) -> Result<(), RealtimeError> {
        if let Err(err) = self
            .push_to_user(
                to,
                ServerEvent::CallEnded {
                    from: from.to_string(),
                    call_type,
                },
            )
            .await
        {
            tracing::warn!(target_id = %to, %err, "failed to push call.ended");
        }

        let Some(chat_id) = chat_id else {
            return Ok(());
        };

        let record = CallHistoryRecord::new(from, to, call_type, started_at, ended_at, chat_id);
        if let Err(err) = self.history.save(&record).await {
            // The peer notification already went out and must not be
            // re-sent, so this failure stops here.
            tracing::error!(caller_id = %from, receiver_id = %to, %err, "failed to persist call history");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    use crate::store::external::{MemoryCallHistoryStore, MemoryUserDirectory};
    use crate::store::presence::MemoryPresenceStore;

    struct Harness {
        presence: Arc<MemoryPresenceStore>,
        directory: Arc<MemoryUserDirectory>,
        history: Arc<MemoryCallHistoryStore>,
        registry: Arc<ConnectionRegistry>,
        relay: CallRelay,
    }

    fn harness() -> Harness {
        let presence = Arc::new(MemoryPresenceStore::new());
        let directory = Arc::new(MemoryUserDirectory::new());
        let history = Arc::new(MemoryCallHistoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = CallRelay::new(
            presence.clone(),
            directory.clone(),
            history.clone(),
            registry.clone(),
        );
        Harness {
            presence,
            directory,
            history,
            registry,
            relay,
        }
    }

    async fn bring_online(
        h: &Harness,
        user_id: &str,
        connection_id: &str,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let profile = UserProfile::new(user_id, user_id);
        h.directory.insert(profile.clone());
        h.presence
            .register_connection(&profile, connection_id)
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        h.registry.add(connection_id, tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn offer_reaches_every_callee_device_with_caller_profile() {
        let h = harness();
        let mut caller_profile = UserProfile::new("alice", "Alice");
        caller_profile.avatar = Some("https://cdn/a.png".to_string());
        h.directory.insert(caller_profile);

        let mut rx1 = bring_online(&h, "bob", "c1").await;
        let mut rx2 = bring_online(&h, "bob", "c2").await;

        h.relay
            .relay_offer(
                "alice",
                "bob",
                serde_json::json!({ "sdp": "v=0" }),
                CallType::Video,
            )
            .await
            .unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            match &events[0] {
                ServerEvent::CallIncoming {
                    from,
                    call_type,
                    caller,
                    ..
                } => {
                    assert_eq!(from, "alice");
                    assert_eq!(*call_type, CallType::Video);
                    assert_eq!(caller.name, "Alice");
                    assert_eq!(caller.avatar.as_deref(), Some("https://cdn/a.png"));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn offer_to_offline_target_is_silent() {
        let h = harness();
        h.directory.insert(UserProfile::new("alice", "Alice"));

        // No registered connections for "bob" anywhere.
        h.relay
            .relay_offer("alice", "bob", serde_json::json!({}), CallType::Voice)
            .await
            .unwrap();

        assert!(h.registry.is_empty());
        assert!(h.history.saved().is_empty());
    }

    #[tokio::test]
    async fn toggles_are_forwarded_verbatim() {
        let h = harness();
        let mut rx = bring_online(&h, "bob", "c1").await;

        h.relay.relay_mic_toggle("bob", false).await.unwrap();
        h.relay.relay_video_toggle("bob", true).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::CallMicToggled { mic_on: false },
                ServerEvent::CallVideoToggled { video_on: true },
            ]
        );
    }

    #[tokio::test]
    async fn end_call_records_floored_duration() {
        let h = harness();
        let mut rx = bring_online(&h, "bob", "c1").await;

        h.relay
            .end_call(
                "alice",
                "bob",
                CallType::Voice,
                at(0),
                at(125),
                Some("chat_1".to_string()),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::CallEnded { .. }));

        let saved = h.history.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].caller_id, "alice");
        assert_eq!(saved[0].receiver_id, "bob");
        assert_eq!(saved[0].duration, 125);
        assert_eq!(saved[0].chat_id, "chat_1");
    }

    #[tokio::test]
    async fn end_call_duration_never_negative() {
        let h = harness();
        h.relay
            .end_call(
                "alice",
                "bob",
                CallType::Video,
                at(100),
                at(40),
                Some("chat_1".to_string()),
            )
            .await
            .unwrap();

        let saved = h.history.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].duration, 0);
    }

    #[tokio::test]
    async fn end_call_without_chat_id_writes_no_history() {
        let h = harness();
        let mut rx = bring_online(&h, "bob", "c1").await;

        h.relay
            .end_call("alice", "bob", CallType::Voice, at(0), at(60), None)
            .await
            .unwrap();

        // Peer still notified, nothing persisted.
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(h.history.saved().is_empty());
    }

    struct FailingCallHistoryStore;

    #[async_trait]
    impl CallHistoryStore for FailingCallHistoryStore {
        async fn save(&self, _record: &CallHistoryRecord) -> Result<(), RealtimeError> {
            Err(RealtimeError::persistence("write rejected"))
        }
    }

    #[tokio::test]
    async fn history_write_failure_after_push_is_not_fatal() {
        let presence = Arc::new(MemoryPresenceStore::new());
        let directory = Arc::new(MemoryUserDirectory::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = CallRelay::new(
            presence.clone(),
            directory.clone(),
            Arc::new(FailingCallHistoryStore),
            registry.clone(),
        );

        let profile = UserProfile::new("bob", "bob");
        presence.register_connection(&profile, "c1").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add("c1", tx);

        // The push already happened; the failed write is logged, not raised.
        relay
            .end_call(
                "alice",
                "bob",
                CallType::Voice,
                at(0),
                at(10),
                Some("chat_1".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
