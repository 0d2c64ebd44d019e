//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod producer;
mod replay;
mod routes;

pub use health::{delivery_health, health, stats, DeliveryHealthResponse, LivenessResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use producer::{broadcast, force, send, BroadcastRequest, ForceRequest, SendRequest};
pub use replay::{heartbeat_ack, replay, HeartbeatAckRequest, ReplayRequest, ReplayResponse};
pub use routes::api_routes;
