use serde::{Deserialize, Serialize};

/// Minimal public profile of a user, as stored in the `online_users` hash
/// and attached to enriched call events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
        }
    }
}
