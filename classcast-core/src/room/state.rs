//! Pure per-room state machine.
//!
//! Every mutation is a method returning a typed outcome; the hub decides
//! what to broadcast. No transport or task types in here, so the whole
//! command table is unit-testable synchronously.

use std::collections::{HashMap, VecDeque};

use crate::models::{
    ChatMessage, CodecPolicy, ConnectionId, HandRaise, Participant, Poll, PollId,
};
use crate::{Error, Result};

use super::events::RoomSnapshot;

/// Longest accepted chat message body, in bytes.
const MAX_CHAT_LEN: usize = 500;

/// Authoritative state for one stream key's classroom.
#[derive(Debug)]
pub struct Room {
    pub stream_key: String,
    participants: HashMap<ConnectionId, Participant>,
    chat: VecDeque<ChatMessage>,
    chat_retention: usize,
    polls: Vec<Poll>,
    hands: VecDeque<HandRaise>,
    policy: CodecPolicy,
    /// Whether an active stream currently exists for this key.
    live: bool,
}

impl Room {
    #[must_use]
    pub fn new(stream_key: String, chat_retention: usize) -> Self {
        Self {
            stream_key,
            participants: HashMap::new(),
            chat: VecDeque::new(),
            chat_retention,
            polls: Vec::new(),
            hands: VecDeque::new(),
            policy: CodecPolicy::default(),
            live: false,
        }
    }

    pub fn join(&mut self, participant: Participant) {
        self.participants
            .insert(participant.connection_id.clone(), participant);
    }

    /// Remove a participant. Returns the removed entry and whether their
    /// hand had to be pulled from the queue.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<(Participant, bool)> {
        let participant = self.participants.remove(connection_id)?;
        let had_hand_raised = participant.hand_raised;
        if had_hand_raised {
            self.hands.retain(|h| &h.connection_id != connection_id);
        }
        Some((participant, had_hand_raised))
    }

    #[must_use]
    pub fn participant(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(connection_id)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    #[must_use]
    pub fn is_teacher(&self, connection_id: &ConnectionId) -> bool {
        self.participants
            .get(connection_id)
            .is_some_and(|p| p.role.is_teacher())
    }

    /// Append a chat message, trimming the log to the retention bound.
    pub fn append_chat(&mut self, sender: &ConnectionId, body: String) -> Result<ChatMessage> {
        let participant = self
            .participants
            .get(sender)
            .ok_or_else(|| Error::NotFound("Sender is not in this room".to_string()))?;
        if body.is_empty() {
            return Err(Error::InvalidInput("Message body cannot be empty".to_string()));
        }
        if body.len() > MAX_CHAT_LEN {
            return Err(Error::InvalidInput(format!(
                "Message body must be at most {MAX_CHAT_LEN} characters"
            )));
        }

        let message = ChatMessage::new(participant.username.clone(), participant.role, body);
        self.chat.push_back(message.clone());
        while self.chat.len() > self.chat_retention {
            self.chat.pop_front();
        }
        Ok(message)
    }

    pub fn create_poll(
        &mut self,
        question: String,
        options: Vec<String>,
        auto_close_seconds: Option<u64>,
    ) -> &Poll {
        let poll = Poll::new(question, options, auto_close_seconds);
        self.polls.push(poll);
        self.polls.last().expect("just pushed")
    }

    /// Apply a vote. Returns the updated poll only when the vote counted;
    /// rejected votes (closed poll, unknown option, repeat voter) are no-ops.
    pub fn vote(&mut self, voter: &ConnectionId, poll_id: &PollId, option_id: &str) -> Option<&Poll> {
        let poll = self.polls.iter_mut().find(|p| &p.id == poll_id)?;
        if poll.vote(voter, option_id) {
            Some(poll)
        } else {
            None
        }
    }

    /// Close a poll. Returns it only on the `active → closed` transition.
    pub fn close_poll(&mut self, poll_id: &PollId) -> Option<&Poll> {
        let poll = self.polls.iter_mut().find(|p| &p.id == poll_id)?;
        if poll.close() {
            Some(poll)
        } else {
            None
        }
    }

    /// Raise a hand. Returns the queue after the change, or `None` if the
    /// hand was already raised.
    pub fn raise_hand(&mut self, connection_id: &ConnectionId) -> Option<Vec<HandRaise>> {
        let participant = self.participants.get_mut(connection_id)?;
        if participant.hand_raised {
            return None;
        }
        participant.hand_raised = true;
        self.hands.push_back(HandRaise::new(
            connection_id.clone(),
            participant.username.clone(),
        ));
        Some(self.hand_queue())
    }

    /// Lower a hand. Returns the queue after the change, or `None` if the
    /// hand was not raised.
    pub fn lower_hand(&mut self, connection_id: &ConnectionId) -> Option<Vec<HandRaise>> {
        let participant = self.participants.get_mut(connection_id)?;
        if !participant.hand_raised {
            return None;
        }
        participant.hand_raised = false;
        self.hands.retain(|h| &h.connection_id != connection_id);
        Some(self.hand_queue())
    }

    #[must_use]
    pub fn hand_queue(&self) -> Vec<HandRaise> {
        self.hands.iter().cloned().collect()
    }

    #[must_use]
    pub const fn policy(&self) -> CodecPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, secondary_enabled: bool) -> CodecPolicy {
        self.policy.secondary_codec_enabled = secondary_enabled;
        self.policy
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.live
    }

    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    /// Eligible for destruction: nobody joined and no active stream.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.participants.is_empty() && !self.live
    }

    #[must_use]
    pub fn active_poll_count(&self) -> usize {
        self.polls.iter().filter(|p| p.is_active()).count()
    }

    /// Snapshot for a `room-state` event. Only active polls are included;
    /// closed ones are history the joiner never saw open.
    #[must_use]
    pub fn snapshot(&self, connection_id: &ConnectionId) -> RoomSnapshot {
        RoomSnapshot {
            stream_key: self.stream_key.clone(),
            connection_id: connection_id.clone(),
            live: self.live,
            participants: self.participants.values().cloned().collect(),
            chat: self.chat.iter().cloned().collect(),
            polls: self.polls.iter().filter(|p| p.is_active()).cloned().collect(),
            hand_queue: self.hand_queue(),
            policy: self.policy,
        }
    }
}
