//! Typed wire protocol for the room event channel.
//!
//! Every message is a tagged record with a `type` discriminator. Commands
//! flow client → server, events server → client. The transport (WebSocket
//! with JSON frames) lives in the API crate; the hub only sees these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, CodecPolicy, ConnectionId, HandRaise, Participant, Poll, PollId, Role};

/// Commands sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Must be the first command on a connection.
    Join {
        username: String,
        role: Role,
    },
    Leave,
    Chat {
        body: String,
    },
    Typing {
        active: bool,
    },
    CreatePoll {
        question: String,
        options: Vec<String>,
        auto_close_seconds: Option<u64>,
    },
    Vote {
        poll_id: PollId,
        option_id: String,
    },
    ClosePoll {
        poll_id: PollId,
    },
    RaiseHand,
    LowerHand,
    SetCodecPolicy {
        secondary_enabled: bool,
    },
}

/// Full room snapshot delivered to a joining connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub stream_key: String,
    pub connection_id: ConnectionId,
    pub live: bool,
    pub participants: Vec<Participant>,
    pub chat: Vec<ChatMessage>,
    pub polls: Vec<Poll>,
    pub hand_queue: Vec<HandRaise>,
    pub policy: CodecPolicy,
}

/// Events emitted by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Sent only to the joining connection.
    RoomState {
        #[serde(flatten)]
        snapshot: RoomSnapshot,
    },
    ParticipantJoined {
        participant: Participant,
        participant_count: usize,
    },
    ParticipantLeft {
        connection_id: ConnectionId,
        username: String,
        participant_count: usize,
    },
    ChatMessage {
        message: ChatMessage,
    },
    UserTyping {
        connection_id: ConnectionId,
        username: String,
        active: bool,
    },
    NewPoll {
        poll: Poll,
    },
    PollUpdated {
        poll: Poll,
    },
    PollClosed {
        poll: Poll,
    },
    HandRaised {
        queue: Vec<HandRaise>,
    },
    HandLowered {
        queue: Vec<HandRaise>,
    },
    SettingsUpdated {
        policy: CodecPolicy,
    },
    StreamStarted {
        stream_key: String,
        started_at: DateTime<Utc>,
    },
    StreamEnded {
        stream_key: String,
    },
    StreamFailed {
        stream_key: String,
        reason: String,
    },
}

impl ServerEvent {
    /// The wire discriminator, for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RoomState { .. } => "room-state",
            Self::ParticipantJoined { .. } => "participant-joined",
            Self::ParticipantLeft { .. } => "participant-left",
            Self::ChatMessage { .. } => "chat-message",
            Self::UserTyping { .. } => "user-typing",
            Self::NewPoll { .. } => "new-poll",
            Self::PollUpdated { .. } => "poll-updated",
            Self::PollClosed { .. } => "poll-closed",
            Self::HandRaised { .. } => "hand-raised",
            Self::HandLowered { .. } => "hand-lowered",
            Self::SettingsUpdated { .. } => "settings-updated",
            Self::StreamStarted { .. } => "stream-started",
            Self::StreamEnded { .. } => "stream-ended",
            Self::StreamFailed { .. } => "stream-failed",
        }
    }
}
