use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{generate_id, ConnectionId, PollId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub vote_count: u32,
}

/// A poll with vote integrity: each connection votes at most once, option
/// counts always sum to the voter-set size, and a closed poll is frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    /// Connection ids that have voted. Not part of the wire payload.
    #[serde(skip)]
    pub voters: HashSet<ConnectionId>,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    pub auto_close_seconds: Option<u64>,
}

impl Poll {
    #[must_use]
    pub fn new(question: String, option_texts: Vec<String>, auto_close_seconds: Option<u64>) -> Self {
        let options = option_texts
            .into_iter()
            .map(|text| PollOption {
                id: generate_id(),
                text,
                vote_count: 0,
            })
            .collect();

        Self {
            id: PollId::new(),
            question,
            options,
            voters: HashSet::new(),
            status: PollStatus::Active,
            created_at: Utc::now(),
            auto_close_seconds,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    /// Record a vote. Returns `false` (leaving the poll untouched) if the
    /// poll is closed, the option is unknown, or the voter already voted.
    pub fn vote(&mut self, voter: &ConnectionId, option_id: &str) -> bool {
        if !self.is_active() || self.voters.contains(voter) {
            return false;
        }
        let Some(option) = self.options.iter_mut().find(|o| o.id == option_id) else {
            return false;
        };
        option.vote_count += 1;
        self.voters.insert(voter.clone());
        true
    }

    /// Transition `active → closed`. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = PollStatus::Closed;
        true
    }

    #[must_use]
    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.vote_count).sum()
    }
}
