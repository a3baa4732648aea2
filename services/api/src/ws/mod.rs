//! Real-time conversation over WebSockets.
//!
//! - `protocol`: the JSON message format between client and server.
//! - `session`: connection lifecycle, access checks and the message loop.
//! - `turn`: the per-utterance pipeline (transcribe, reply, synthesize).

pub mod protocol;
pub mod session;
mod turn;

pub use session::ws_handler;
