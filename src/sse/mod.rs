//! Server-Sent Events fallback channel.
//!
//! Clients open `GET /api/v1/notifications/stream?token=<JWT>` (or send
//! `Authorization: Bearer <JWT>`). The first frame is `connection_established`;
//! after that the stream carries `notification`, `heartbeat` and `shutdown`
//! frames. Reconnecting with `Last-Event-ID` replays what was missed.

mod frame;
mod handler;

pub use frame::{StreamEventKind, StreamFrame};
pub use handler::{stream_handler, StreamQuery};
