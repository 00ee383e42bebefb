//! HTTP and WebSocket surface for the classcast origin: the HLS read
//! surface with origin cache hints, status endpoints, and the realtime
//! room event channel.

pub mod http;
pub mod websocket;

pub use http::{create_router, AppState};
