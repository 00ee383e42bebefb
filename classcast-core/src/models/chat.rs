use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::participant::Role;

/// One chat message, append-only within a room's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current server time.
    #[must_use]
    pub fn new(username: String, role: Role, body: String) -> Self {
        Self {
            id: generate_id(),
            username,
            role,
            body,
            timestamp: Utc::now(),
        }
    }
}
