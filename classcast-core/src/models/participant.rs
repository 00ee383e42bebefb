use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::ConnectionId;

/// Room role. The client's claim is accepted at join time (identity is not
/// authenticated), but every privileged command is checked against the
/// stored role server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub const fn is_teacher(self) -> bool {
        matches!(self, Self::Teacher)
    }
}

/// One joined connection in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub username: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    /// Mirrors presence in the room's hand-raise queue.
    pub hand_raised: bool,
}

impl Participant {
    #[must_use]
    pub fn new(connection_id: ConnectionId, username: String, role: Role) -> Self {
        Self {
            connection_id,
            username,
            role,
            joined_at: Utc::now(),
            hand_raised: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_check() {
        assert!(Role::Teacher.is_teacher());
        assert!(!Role::Student.is_teacher());
    }

    #[test]
    fn test_new_participant() {
        let p = Participant::new(ConnectionId::new(), "ada".to_string(), Role::Student);
        assert_eq!(p.username, "ada");
        assert!(!p.hand_raised);
    }
}
