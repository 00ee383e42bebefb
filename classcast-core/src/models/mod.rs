pub mod chat;
pub mod hand;
pub mod id;
pub mod participant;
pub mod policy;
pub mod poll;
pub mod rendition;

pub use chat::ChatMessage;
pub use hand::HandRaise;
pub use id::{generate_id, ConnectionId, PollId};
pub use participant::{Participant, Role};
pub use policy::CodecPolicy;
pub use poll::{Poll, PollOption, PollStatus};
pub use rendition::{Codec, Rendition};
