use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::ConnectionId;

/// One entry in a room's FIFO hand-raise queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandRaise {
    pub connection_id: ConnectionId,
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

impl HandRaise {
    #[must_use]
    pub fn new(connection_id: ConnectionId, username: String) -> Self {
        Self {
            connection_id,
            username,
            timestamp: Utc::now(),
        }
    }
}
