//! Shared presence store: user ↔ live connection bookkeeping.
//!
//! Presence is per-**user**, not per-connection. A user is online iff at
//! least one of their connections (devices) is live. The store is the single
//! source of truth across relay processes; no in-process cache is
//! authoritative.
//!
//! Three structures are kept in lockstep:
//! - hash `online_users`: user id → serialized minimal profile
//! - hash `socket_to_user`: connection id → user id (reverse index, so a
//!   disconnect carrying only a connection id resolves without a scan)
//! - set `user:{id}:connections`: live connection ids per user
//!
//! Every mutation that touches more than one structure runs as a single
//! atomic unit (a server-side script in Redis, one mutex in memory), so the
//! reverse-map invariant holds under arbitrary interleaving of devices. The
//! scripts matter: decisions like "delete the record when the set empties"
//! read state and act on it, and splitting that across round trips lets a
//! concurrent registration slip between the read and the write.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;
use crate::models::{AuxConnection, PresenceRecord, UserProfile};

const ONLINE_USERS_KEY: &str = "online_users";
const SOCKET_TO_USER_KEY: &str = "socket_to_user";

fn connections_key(user_id: &str) -> String {
    format!("user:{user_id}:connections")
}

/// Value serialized into the `online_users` hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPresence {
    profile: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    aux: Option<AuxConnection>,
}

/// Durable-while-online presence mapping.
///
/// Backed by Redis in production and an in-memory store in tests (and in
/// single-process deployments without a shared store).
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Idempotent. Cleans up any stale reverse mapping for `connection_id`
    /// first, then adds the connection to the user's set and reverse map,
    /// creating the presence record on first connection.
    async fn register_connection(
        &self,
        user: &UserProfile,
        connection_id: &str,
    ) -> Result<(), RealtimeError>;

    /// Records a secondary connection tagged for a logical channel. The
    /// connection also enters the general set and reverse map, so it is
    /// covered by the same liveness and cleanup guarantees.
    async fn set_auxiliary_connection(
        &self,
        user: &UserProfile,
        channel: &str,
        connection_id: &str,
    ) -> Result<(), RealtimeError>;

    /// Resolves the connection via the reverse map and removes it. A missing
    /// reverse entry is a no-op (already cleaned up, or never registered).
    /// Deletes the whole record when the last connection goes. Returns the
    /// user id the connection belonged to, if any.
    async fn unregister_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<String>, RealtimeError>;

    /// Force-removes every connection of a user (admin block/kick). Reverse
    /// entries are removed in the same unit as the set, so none are orphaned.
    async fn unregister_user(&self, user_id: &str) -> Result<(), RealtimeError>;

    /// Live connection ids for a user; empty when offline.
    async fn connections(&self, user_id: &str) -> Result<Vec<String>, RealtimeError>;

    async fn is_online(&self, user_id: &str) -> Result<Option<PresenceRecord>, RealtimeError>;

    async fn list_online(&self) -> Result<Vec<PresenceRecord>, RealtimeError>;

    async fn online_count(&self) -> Result<usize, RealtimeError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Registration: evict any stale reverse mapping for the connection id,
/// merge a previously tagged auxiliary connection into the payload unless
/// the caller supplies a new one, then write all three structures.
///
/// KEYS: online_users, socket_to_user, the user's connection set.
/// ARGV: connection id, user id, serialized record, "1" to keep stored aux.
const REGISTER_SCRIPT: &str = r#"
local conn_id = ARGV[1]
local user_id = ARGV[2]
local payload = ARGV[3]

local stale = redis.call('HGET', KEYS[2], conn_id)
if stale and stale ~= user_id then
    local stale_set = 'user:' .. stale .. ':connections'
    redis.call('SREM', stale_set, conn_id)
    if redis.call('SCARD', stale_set) == 0 then
        redis.call('DEL', stale_set)
        redis.call('HDEL', KEYS[1], stale)
    end
end

if ARGV[4] == '1' then
    local existing = redis.call('HGET', KEYS[1], user_id)
    if existing then
        local old = cjson.decode(existing)
        if old.aux ~= nil then
            local fresh = cjson.decode(payload)
            fresh.aux = old.aux
            payload = cjson.encode(fresh)
        end
    end
end

redis.call('HSET', KEYS[1], user_id, payload)
redis.call('SADD', KEYS[3], conn_id)
redis.call('HSET', KEYS[2], conn_id, user_id)
"#;

/// Disconnect: resolve the connection through the reverse map, remove it,
/// and drop the whole record when the set empties. Returns the owning user
/// id, or nil when the connection was unknown.
///
/// KEYS: socket_to_user, online_users. ARGV: connection id.
const DISCONNECT_SCRIPT: &str = r#"
local user_id = redis.call('HGET', KEYS[1], ARGV[1])
if not user_id then
    return false
end
local set_key = 'user:' .. user_id .. ':connections'
redis.call('SREM', set_key, ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
if redis.call('SCARD', set_key) == 0 then
    redis.call('DEL', set_key)
    redis.call('HDEL', KEYS[2], user_id)
end
return user_id
"#;

/// Force-removal of a user: drop every reverse entry the set names, then
/// the set and the record, in one unit so a registration racing the purge
/// cannot leave an orphaned reverse entry.
///
/// KEYS: socket_to_user, online_users, the user's connection set.
/// ARGV: user id.
const PURGE_USER_SCRIPT: &str = r#"
local conns = redis.call('SMEMBERS', KEYS[3])
for _, conn_id in ipairs(conns) do
    redis.call('HDEL', KEYS[1], conn_id)
end
redis.call('DEL', KEYS[3])
redis.call('HDEL', KEYS[2], ARGV[1])
"#;

pub struct RedisPresenceStore {
    manager: redis::aio::ConnectionManager,
    register: redis::Script,
    disconnect: redis::Script,
    purge_user: redis::Script,
}

impl RedisPresenceStore {
    pub fn new(manager: redis::aio::ConnectionManager) -> Self {
        Self {
            manager,
            register: redis::Script::new(REGISTER_SCRIPT),
            disconnect: redis::Script::new(DISCONNECT_SCRIPT),
            purge_user: redis::Script::new(PURGE_USER_SCRIPT),
        }
    }

    /// Open a managed connection to the given Redis URL.
    pub async fn open(url: &str) -> Result<Self, RealtimeError> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self::new(manager))
    }

    async fn write_registration(
        &self,
        user: &UserProfile,
        connection_id: &str,
        aux: Option<AuxConnection>,
    ) -> Result<(), RealtimeError> {
        let mut conn = self.manager.clone();
        let keep_stored_aux = if aux.is_none() { "1" } else { "0" };
        let stored = StoredPresence {
            profile: user.clone(),
            aux,
        };
        let payload = serde_json::to_string(&stored)?;

        self.register
            .key(ONLINE_USERS_KEY)
            .key(SOCKET_TO_USER_KEY)
            .key(connections_key(&user.id))
            .arg(connection_id)
            .arg(&user.id)
            .arg(payload)
            .arg(keep_stored_aux)
            .invoke_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn register_connection(
        &self,
        user: &UserProfile,
        connection_id: &str,
    ) -> Result<(), RealtimeError> {
        self.write_registration(user, connection_id, None).await
    }

    async fn set_auxiliary_connection(
        &self,
        user: &UserProfile,
        channel: &str,
        connection_id: &str,
    ) -> Result<(), RealtimeError> {
        let aux = AuxConnection {
            channel: channel.to_string(),
            connection_id: connection_id.to_string(),
        };
        self.write_registration(user, connection_id, Some(aux)).await
    }

    async fn unregister_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<String>, RealtimeError> {
        let mut conn = self.manager.clone();
        // A nil reply means already cleaned up or never registered; normal
        // on duplicate close signals.
        let user_id: Option<String> = self
            .disconnect
            .key(SOCKET_TO_USER_KEY)
            .key(ONLINE_USERS_KEY)
            .arg(connection_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(user_id)
    }

    async fn unregister_user(&self, user_id: &str) -> Result<(), RealtimeError> {
        let mut conn = self.manager.clone();
        self.purge_user
            .key(SOCKET_TO_USER_KEY)
            .key(ONLINE_USERS_KEY)
            .key(connections_key(user_id))
            .arg(user_id)
            .invoke_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn connections(&self, user_id: &str) -> Result<Vec<String>, RealtimeError> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn.smembers(connections_key(user_id)).await?;
        Ok(ids)
    }

    async fn is_online(&self, user_id: &str) -> Result<Option<PresenceRecord>, RealtimeError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.hget(ONLINE_USERS_KEY, user_id).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let stored: StoredPresence = serde_json::from_str(&raw)?;
        let connection_ids: Vec<String> = conn.smembers(connections_key(user_id)).await?;
        if connection_ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(PresenceRecord {
            user: stored.profile,
            connection_ids,
            aux: stored.aux,
        }))
    }

    async fn list_online(&self) -> Result<Vec<PresenceRecord>, RealtimeError> {
        let mut conn = self.manager.clone();
        let entries: HashMap<String, String> = conn.hgetall(ONLINE_USERS_KEY).await?;

        let mut records = Vec::with_capacity(entries.len());
        for (user_id, raw) in entries {
            let stored: StoredPresence = serde_json::from_str(&raw)?;
            let connection_ids: Vec<String> = conn.smembers(connections_key(&user_id)).await?;
            if connection_ids.is_empty() {
                continue;
            }
            records.push(PresenceRecord {
                user: stored.profile,
                connection_ids,
                aux: stored.aux,
            });
        }
        Ok(records)
    }

    async fn online_count(&self) -> Result<usize, RealtimeError> {
        let mut conn = self.manager.clone();
        let count: usize = conn.hlen(ONLINE_USERS_KEY).await?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, StoredPresence>,
    sockets: HashMap<String, String>,
    connections: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    fn remove_connection(&mut self, user_id: &str, connection_id: &str) {
        self.sockets.remove(connection_id);
        let empty = match self.connections.get_mut(user_id) {
            Some(set) => {
                set.remove(connection_id);
                set.is_empty()
            }
            None => true,
        };
        if empty {
            self.connections.remove(user_id);
            self.users.remove(user_id);
        }
    }

    fn register(&mut self, user: &UserProfile, connection_id: &str, aux: Option<AuxConnection>) {
        if let Some(stale_user) = self.sockets.get(connection_id).cloned() {
            if stale_user != user.id {
                self.remove_connection(&stale_user, connection_id);
            }
        }

        let aux = aux.or_else(|| self.users.get(&user.id).and_then(|s| s.aux.clone()));
        self.users.insert(
            user.id.clone(),
            StoredPresence {
                profile: user.clone(),
                aux,
            },
        );
        self.connections
            .entry(user.id.clone())
            .or_default()
            .insert(connection_id.to_string());
        self.sockets
            .insert(connection_id.to_string(), user.id.clone());
    }

    fn record(&self, user_id: &str) -> Option<PresenceRecord> {
        let stored = self.users.get(user_id)?;
        let set = self.connections.get(user_id)?;
        if set.is_empty() {
            return None;
        }
        let mut connection_ids: Vec<String> = set.iter().cloned().collect();
        connection_ids.sort();
        Some(PresenceRecord {
            user: stored.profile.clone(),
            connection_ids,
            aux: stored.aux.clone(),
        })
    }
}

/// Single-process presence store. One mutex over all three structures gives
/// the same all-or-nothing update unit as the Redis pipeline.
#[derive(Default)]
pub struct MemoryPresenceStore {
    state: Mutex<MemoryState>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn register_connection(
        &self,
        user: &UserProfile,
        connection_id: &str,
    ) -> Result<(), RealtimeError> {
        self.state.lock().register(user, connection_id, None);
        Ok(())
    }

    async fn set_auxiliary_connection(
        &self,
        user: &UserProfile,
        channel: &str,
        connection_id: &str,
    ) -> Result<(), RealtimeError> {
        let aux = AuxConnection {
            channel: channel.to_string(),
            connection_id: connection_id.to_string(),
        };
        self.state.lock().register(user, connection_id, Some(aux));
        Ok(())
    }

    async fn unregister_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<String>, RealtimeError> {
        let mut state = self.state.lock();
        let Some(user_id) = state.sockets.get(connection_id).cloned() else {
            return Ok(None);
        };
        state.remove_connection(&user_id, connection_id);
        Ok(Some(user_id))
    }

    async fn unregister_user(&self, user_id: &str) -> Result<(), RealtimeError> {
        let mut state = self.state.lock();
        if let Some(set) = state.connections.remove(user_id) {
            for connection_id in set {
                state.sockets.remove(&connection_id);
            }
        }
        state.users.remove(user_id);
        Ok(())
    }

    async fn connections(&self, user_id: &str) -> Result<Vec<String>, RealtimeError> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .connections
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn is_online(&self, user_id: &str) -> Result<Option<PresenceRecord>, RealtimeError> {
        Ok(self.state.lock().record(user_id))
    }

    async fn list_online(&self) -> Result<Vec<PresenceRecord>, RealtimeError> {
        let state = self.state.lock();
        let mut records: Vec<PresenceRecord> = state
            .users
            .keys()
            .filter_map(|user_id| state.record(user_id))
            .collect();
        records.sort_by(|a, b| a.user.id.cmp(&b.user.id));
        Ok(records)
    }

    async fn online_count(&self) -> Result<usize, RealtimeError> {
        Ok(self.state.lock().users.len())
    }
}
