use serde::{Deserialize, Serialize};

use super::profile::UserProfile;

/// A secondary connection tagged for a specific logical channel (e.g. the
/// connection a client dedicates to chat-only delivery). Also present in the
/// user's general connection set, so liveness and cleanup are uniform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxConnection {
    pub channel: String,
    pub connection_id: String,
}

/// One user's online status: exists iff the user has at least one live
/// connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user: UserProfile,
    /// Live connection ids for this user. Non-empty by construction.
    pub connection_ids: Vec<String>,
    /// Last auxiliary connection registered for a tagged channel, if any.
    pub aux: Option<AuxConnection>,
}
