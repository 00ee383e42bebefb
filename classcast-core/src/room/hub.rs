//! In-memory hub for rooms and their connected clients.
//!
//! The hub owns the room table (lazy create, destroy when idle) and a
//! registry of per-connection senders. All mutations to one room happen
//! under that room's mutex, and events are enqueued into the per-connection
//! queues while the lock is held, so every connection observes room events
//! in the order the hub produced them.
//!
//! Senders are the bounded queues owned by the transport layer. Delivery
//! uses `try_send`: a connection whose queue is full is dropped rather than
//! allowed to block the room.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::models::{CodecPolicy, ConnectionId, Participant, PollId, Role};
use crate::Error;

use super::events::ServerEvent;
use super::state::Room;

/// Per-connection registration: which room it joined and how to reach it.
struct ConnectionEntry {
    stream_key: String,
    sender: mpsc::Sender<ServerEvent>,
    /// Last typing indicator sent, cleared on disconnect so no stale
    /// "is typing" survives the connection.
    typing: bool,
}

/// Compact room description for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub stream_key: String,
    pub participant_count: usize,
    pub live: bool,
    pub active_polls: usize,
    pub hand_queue_len: usize,
    pub policy: CodecPolicy,
}

#[derive(Clone)]
pub struct RoomHub {
    rooms: Arc<DashMap<String, Arc<Mutex<Room>>>>,
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    chat_retention: usize,
}

impl RoomHub {
    #[must_use]
    pub fn new(chat_retention: usize) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            connections: Arc::new(DashMap::new()),
            chat_retention,
        }
    }

    fn room_entry(&self, stream_key: &str) -> Arc<Mutex<Room>> {
        self.rooms
            .entry(stream_key.to_string())
            .or_insert_with(|| {
                debug!(%stream_key, "Creating room");
                Arc::new(Mutex::new(Room::new(
                    stream_key.to_string(),
                    self.chat_retention,
                )))
            })
            .clone()
    }

    /// Join a connection to a room, delivering the `room-state` snapshot to
    /// the joiner and `participant-joined` to everyone else.
    pub async fn join(
        &self,
        stream_key: &str,
        connection_id: ConnectionId,
        username: String,
        role: Role,
        sender: mpsc::Sender<ServerEvent>,
    ) {
        if self.connections.contains_key(&connection_id) {
            warn!(%connection_id, "Connection attempted to join a second room, ignoring");
            return;
        }

        let room = self.room_entry(stream_key);
        let mut failed = Vec::new();
        {
            let mut room = room.lock().await;
            let participant = Participant::new(connection_id.clone(), username.clone(), role);
            room.join(participant.clone());

            self.connections.insert(
                connection_id.clone(),
                ConnectionEntry {
                    stream_key: stream_key.to_string(),
                    sender: sender.clone(),
                    typing: false,
                },
            );

            let snapshot = room.snapshot(&connection_id);
            if sender.try_send(ServerEvent::RoomState { snapshot }).is_err() {
                failed.push(connection_id.clone());
            }

            self.deliver(
                &room,
                Some(&connection_id),
                ServerEvent::ParticipantJoined {
                    participant,
                    participant_count: room.participant_count(),
                },
                &mut failed,
            );
        }
        self.drop_failed(failed).await;

        info!(%stream_key, %connection_id, %username, ?role, "Participant joined");
    }

    /// Apply a client command. Violations (unknown room, unauthorized
    /// command, integrity no-ops) are dropped with a log, never an error
    /// back to the client.
    pub async fn apply(&self, connection_id: &ConnectionId, command: super::events::ClientCommand) {
        use super::events::ClientCommand as Cmd;

        let Some((stream_key, room)) = self.lookup(connection_id) else {
            debug!(%connection_id, "Command from unjoined connection, dropping");
            return;
        };

        let mut failed = Vec::new();
        match command {
            Cmd::Join { .. } => {
                // Already joined; duplicate join is a protocol violation.
                debug!(%connection_id, "Duplicate join, dropping");
            }
            Cmd::Leave => {
                self.disconnect(connection_id).await;
                return;
            }
            Cmd::Chat { body } => {
                let mut room = room.lock().await;
                match room.append_chat(connection_id, body) {
                    Ok(message) => {
                        self.deliver(&room, None, ServerEvent::ChatMessage { message }, &mut failed);
                    }
                    Err(e) => info!(%connection_id, "Chat rejected: {e}"),
                }
            }
            Cmd::Typing { active } => {
                if let Some(mut entry) = self.connections.get_mut(connection_id) {
                    entry.typing = active;
                }
                let room = room.lock().await;
                if let Some(participant) = room.participant(connection_id) {
                    let event = ServerEvent::UserTyping {
                        connection_id: connection_id.clone(),
                        username: participant.username.clone(),
                        active,
                    };
                    self.deliver(&room, Some(connection_id), event, &mut failed);
                }
            }
            Cmd::CreatePoll {
                question,
                options,
                auto_close_seconds,
            } => {
                let mut room = room.lock().await;
                if !room.is_teacher(connection_id) {
                    info!(%connection_id, "Unauthorized create-poll, dropping");
                } else if options.len() < 2 {
                    info!(%connection_id, "create-poll with fewer than two options, dropping");
                } else {
                    let poll = room.create_poll(question, options, auto_close_seconds).clone();
                    let poll_id = poll.id.clone();
                    self.deliver(&room, None, ServerEvent::NewPoll { poll }, &mut failed);
                    if let Some(seconds) = auto_close_seconds {
                        self.schedule_poll_close(stream_key.clone(), poll_id, seconds);
                    }
                }
            }
            Cmd::Vote { poll_id, option_id } => {
                let mut room = room.lock().await;
                if let Some(poll) = room.vote(connection_id, &poll_id, &option_id) {
                    let poll = poll.clone();
                    self.deliver(&room, None, ServerEvent::PollUpdated { poll }, &mut failed);
                } else {
                    debug!(%connection_id, %poll_id, "Vote rejected");
                }
            }
            Cmd::ClosePoll { poll_id } => {
                let mut room = room.lock().await;
                if !room.is_teacher(connection_id) {
                    info!(%connection_id, "Unauthorized close-poll, dropping");
                } else if let Some(poll) = room.close_poll(&poll_id) {
                    let poll = poll.clone();
                    self.deliver(&room, None, ServerEvent::PollClosed { poll }, &mut failed);
                }
            }
            Cmd::RaiseHand => {
                let mut room = room.lock().await;
                if let Some(queue) = room.raise_hand(connection_id) {
                    self.deliver(&room, None, ServerEvent::HandRaised { queue }, &mut failed);
                }
            }
            Cmd::LowerHand => {
                let mut room = room.lock().await;
                if let Some(queue) = room.lower_hand(connection_id) {
                    self.deliver(&room, None, ServerEvent::HandLowered { queue }, &mut failed);
                }
            }
            Cmd::SetCodecPolicy { secondary_enabled } => {
                let mut room = room.lock().await;
                if !room.is_teacher(connection_id) {
                    info!(%connection_id, "Unauthorized set-codec-policy, dropping");
                } else {
                    let policy = room.set_policy(secondary_enabled);
                    info!(%stream_key, secondary_enabled, "Codec policy updated");
                    self.deliver(&room, None, ServerEvent::SettingsUpdated { policy }, &mut failed);
                }
            }
        }
        self.drop_failed(failed).await;
    }

    /// Remove a connection from its room (transport close or `leave`).
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        self.drop_failed(vec![connection_id.clone()]).await;
    }

    /// Remove one connection, returning any further connections whose
    /// queues overflowed while broadcasting the departure. Kept separate
    /// from [`Self::drop_failed`] so eviction cascades stay iterative.
    async fn remove_connection(&self, connection_id: &ConnectionId) -> Vec<ConnectionId> {
        let mut failed = Vec::new();
        let Some((_, entry)) = self.connections.remove(connection_id) else {
            return failed;
        };
        let Some(room) = self.rooms.get(&entry.stream_key).map(|r| r.clone()) else {
            return failed;
        };

        let destroy;
        {
            let mut room = room.lock().await;
            if let Some((participant, had_hand_raised)) = room.leave(connection_id) {
                if entry.typing {
                    let event = ServerEvent::UserTyping {
                        connection_id: connection_id.clone(),
                        username: participant.username.clone(),
                        active: false,
                    };
                    self.deliver(&room, None, event, &mut failed);
                }
                if had_hand_raised {
                    let queue = room.hand_queue();
                    self.deliver(&room, None, ServerEvent::HandLowered { queue }, &mut failed);
                }
                let event = ServerEvent::ParticipantLeft {
                    connection_id: connection_id.clone(),
                    username: participant.username,
                    participant_count: room.participant_count(),
                };
                self.deliver(&room, None, event, &mut failed);
            }
            destroy = room.is_idle();
        }
        if destroy {
            self.destroy_if_idle(&entry.stream_key).await;
        }

        info!(stream_key = %entry.stream_key, %connection_id, "Participant left");
        failed
    }

    /// Codec policy snapshot for a key; the default when no room exists.
    pub async fn codec_policy(&self, stream_key: &str) -> CodecPolicy {
        match self.rooms.get(stream_key).map(|r| r.clone()) {
            Some(room) => room.lock().await.policy(),
            None => CodecPolicy::default(),
        }
    }

    /// Mark a key live and tell the room. Lazily creates the room, so a
    /// publish on a never-joined key still has a policy holder.
    pub async fn stream_started(&self, stream_key: &str) {
        let room = self.room_entry(stream_key);
        let mut failed = Vec::new();
        {
            let mut room = room.lock().await;
            room.set_live(true);
            let event = ServerEvent::StreamStarted {
                stream_key: stream_key.to_string(),
                started_at: Utc::now(),
            };
            self.deliver(&room, None, event, &mut failed);
        }
        self.drop_failed(failed).await;
    }

    pub async fn stream_ended(&self, stream_key: &str) {
        self.finish_stream(
            stream_key,
            ServerEvent::StreamEnded {
                stream_key: stream_key.to_string(),
            },
        )
        .await;
    }

    /// A transcoder died under an active stream.
    pub async fn stream_failed(&self, stream_key: &str, reason: String) {
        self.finish_stream(
            stream_key,
            ServerEvent::StreamFailed {
                stream_key: stream_key.to_string(),
                reason,
            },
        )
        .await;
    }

    async fn finish_stream(&self, stream_key: &str, event: ServerEvent) {
        let Some(room) = self.rooms.get(stream_key).map(|r| r.clone()) else {
            return;
        };
        let mut failed = Vec::new();
        let destroy;
        {
            let mut room = room.lock().await;
            room.set_live(false);
            self.deliver(&room, None, event, &mut failed);
            destroy = room.is_idle();
        }
        if destroy {
            self.destroy_if_idle(stream_key).await;
        }
        self.drop_failed(failed).await;
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub async fn room_summary(&self, stream_key: &str) -> crate::Result<RoomSummary> {
        let room = self
            .rooms
            .get(stream_key)
            .map(|r| r.clone())
            .ok_or_else(|| Error::NotFound(format!("No room for key {stream_key}")))?;
        let room = room.lock().await;
        Ok(RoomSummary {
            stream_key: room.stream_key.clone(),
            participant_count: room.participant_count(),
            live: room.is_live(),
            active_polls: room.active_poll_count(),
            hand_queue_len: room.hand_queue().len(),
            policy: room.policy(),
        })
    }

    fn lookup(&self, connection_id: &ConnectionId) -> Option<(String, Arc<Mutex<Room>>)> {
        let entry = self.connections.get(connection_id)?;
        let stream_key = entry.stream_key.clone();
        drop(entry);
        let room = self.rooms.get(&stream_key)?.clone();
        Some((stream_key, room))
    }

    /// Enqueue an event to every participant (optionally excluding one)
    /// while the caller holds the room lock. Connections whose bounded
    /// queue rejects the event are collected for cleanup after the lock
    /// is released.
    fn deliver(
        &self,
        room: &Room,
        exclude: Option<&ConnectionId>,
        event: ServerEvent,
        failed: &mut Vec<ConnectionId>,
    ) {
        for participant in room.participants() {
            let id = &participant.connection_id;
            if exclude == Some(id) {
                continue;
            }
            let Some(entry) = self.connections.get(id) else {
                continue;
            };
            match entry.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %id, event_type = event.event_type(),
                        "Send queue full, dropping slow connection");
                    failed.push(id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    failed.push(id.clone());
                }
            }
        }
    }

    async fn drop_failed(&self, mut failed: Vec<ConnectionId>) {
        while let Some(connection_id) = failed.pop() {
            let more = self.remove_connection(&connection_id).await;
            failed.extend(more);
        }
    }

    async fn destroy_if_idle(&self, stream_key: &str) {
        let Some(room) = self.rooms.get(stream_key).map(|r| r.clone()) else {
            return;
        };
        let idle = room.lock().await.is_idle();
        if idle {
            self.rooms.remove(stream_key);
            debug!(%stream_key, "Room idle, destroyed");
        }
    }

    /// Auto-close timer for a poll; firing on an already-closed poll is a
    /// no-op, so `poll-closed` is emitted at most once.
    fn schedule_poll_close(&self, stream_key: String, poll_id: PollId, seconds: u64) {
        let hub = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let Some(room) = hub.rooms.get(&stream_key).map(|r| r.clone()) else {
                return;
            };
            let mut failed = Vec::new();
            {
                let mut room = room.lock().await;
                if let Some(poll) = room.close_poll(&poll_id) {
                    let poll = poll.clone();
                    debug!(%stream_key, poll_id = %poll.id, "Poll auto-closed");
                    hub.deliver(&room, None, ServerEvent::PollClosed { poll }, &mut failed);
                }
            }
            hub.drop_failed(failed).await;
        });
    }
}
