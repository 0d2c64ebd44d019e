//! Registry of live persistent (SSE) connections.
//!
//! This module provides:
//! - Per-recipient connection indexing with an eviction cap
//! - Per-connection heartbeat tasks
//! - Independent, self-healing fan-out
//! - Connection statistics

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::{ConnectionInfo, ConnectionStats};
pub use types::{
    CloseReason, ConnectionError, ConnectionHandle, ConnectionLimits, ConnectionStream,
    FrameWriteError,
};
