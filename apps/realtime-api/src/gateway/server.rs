//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use linkfeed_common::id::{prefix, prefixed_ulid};

use crate::error::RealtimeError;
use crate::AppState;

use super::events::{ClientEvent, ServerEvent};
use super::notify::NotifyRequest;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// One task per connection: reads client events, forwards everything queued
/// on the connection's outbound channel, and unregisters exactly once on
/// close.
async fn handle_connection(socket: WebSocket, state: AppState) {
    let connection_id = prefixed_ulid(prefix::CONNECTION);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.registry.add(&connection_id, out_tx);

    tracing::debug!(connection_id = %connection_id, "gateway connection established");

    loop {
        tokio::select! {
            // Inbound frame from the client.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event: ClientEvent = match serde_json::from_str(&text) {
                            Ok(event) => event,
                            Err(err) => {
                                // Malformed or unknown event: log and drop,
                                // no partial emission.
                                tracing::debug!(connection_id = %connection_id, %err, "dropping malformed event");
                                continue;
                            }
                        };
                        if let Err(err) = dispatch(&state, &connection_id, event).await {
                            tracing::error!(connection_id = %connection_id, %err, "event handler failed");
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %connection_id, ?err, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Event queued for this connection by a fan-out or relay.
            event = out_rx.recv() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::error!(connection_id = %connection_id, %err, "failed to serialize outbound event");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Exactly one unregister per connection lifetime. A duplicate close
    // signal resolves to a reverse-map miss and is absorbed as a no-op.
    state.registry.remove(&connection_id);
    match state.presence.unregister_connection(&connection_id).await {
        Ok(Some(user_id)) => {
            tracing::info!(connection_id = %connection_id, user_id = %user_id, "gateway connection ended");
            if let Err(err) = state.admin.broadcast_online_count().await {
                tracing::warn!(%err, "failed to broadcast online count after disconnect");
            }
        }
        Ok(None) => {
            tracing::debug!(connection_id = %connection_id, "gateway connection ended (never registered)");
        }
        Err(err) => {
            tracing::error!(connection_id = %connection_id, %err, "failed to unregister connection");
        }
    }
}

/// Route one inbound event to its handler.
async fn dispatch(
    state: &AppState,
    connection_id: &str,
    event: ClientEvent,
) -> Result<(), RealtimeError> {
    match event {
        ClientEvent::PresenceRegister { user_id } => {
            let Some(profile) = state.users.lookup(&user_id).await? else {
                return Err(RealtimeError::validation(format!(
                    "cannot register unknown user {user_id}"
                )));
            };
            state
                .presence
                .register_connection(&profile, connection_id)
                .await?;
            tracing::info!(connection_id = %connection_id, user_id = %user_id, "connection registered");
            state.admin.broadcast_online_count().await
        }

        ClientEvent::PresenceRegisterAuxiliary { user_id, channel } => {
            let Some(profile) = state.users.lookup(&user_id).await? else {
                return Err(RealtimeError::validation(format!(
                    "cannot register unknown user {user_id}"
                )));
            };
            state
                .presence
                .set_auxiliary_connection(&profile, &channel, connection_id)
                .await?;
            tracing::info!(connection_id = %connection_id, user_id = %user_id, %channel, "auxiliary connection registered");
            state.admin.broadcast_online_count().await
        }

        ClientEvent::PresenceListOnline {} => {
            let user_ids = state
                .presence
                .list_online()
                .await?
                .into_iter()
                .map(|record| record.user.id)
                .collect();
            state
                .registry
                .send_to(connection_id, ServerEvent::OnlineList { user_ids });
            Ok(())
        }

        ClientEvent::CallOffer {
            from,
            to,
            offer,
            call_type,
        } => state.calls.relay_offer(&from, &to, offer, call_type).await,

        ClientEvent::CallAnswer {
            from,
            to,
            answer,
            call_type,
        } => state.calls.relay_answer(&from, &to, answer, call_type).await,

        ClientEvent::CallIce {
            from,
            to,
            candidate,
        } => state.calls.relay_ice_candidate(&from, &to, candidate).await,

        ClientEvent::CallEnd {
            from,
            to,
            call_type,
            started_at,
            ended_at,
            chat_id,
        } => {
            state
                .calls
                .end_call(&from, &to, call_type, started_at, ended_at, chat_id)
                .await
        }

        ClientEvent::CallToggleMic { to, mic_on } => {
            state.calls.relay_mic_toggle(&to, mic_on).await
        }

        ClientEvent::CallToggleVideo { to, video_on } => {
            state.calls.relay_video_toggle(&to, video_on).await
        }

        ClientEvent::NotifySend {
            sender_id,
            recipient_ids,
            kind,
            message,
            related_post_id,
            related_group_id,
            sender_name,
        } => {
            state
                .notifications
                .notify(NotifyRequest {
                    sender_id,
                    recipient_ids,
                    kind,
                    message,
                    related_post_id,
                    related_group_id,
                    sender_name,
                })
                .await
        }

        ClientEvent::AdminJoin {} => state.admin.on_admin_join(connection_id).await,

        ClientEvent::AdminRefresh {} => state.admin.send_count_to(connection_id).await,
    }
}
