// Room subsystem: pure per-room state machine plus the hub that owns the
// room table and fans events out to connected clients.

pub mod events;
pub mod hub;
pub mod state;

pub use events::{ClientCommand, RoomSnapshot, ServerEvent};
pub use hub::{RoomHub, RoomSummary};
pub use state::Room;
