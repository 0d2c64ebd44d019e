//! Notification delivery: transport selection, retries and outcome tracking.
//!
//! - `DeliveryOrchestrator` picks the primary pub/sub channel or the SSE fallback
//! - `PrimaryChannel` / `FallbackChannel` are the transport seams
//! - `RetryPolicy` schedules primary attempts
//! - `DeliveryIntake` is the typed producer queue

mod channel;
mod intake;
mod orchestrator;
mod retry;
mod types;

pub use channel::{
    ChannelError, FallbackChannel, PrimaryChannel, PublishReceipt, PublishTarget,
    RedisPubSubChannel, UnconfiguredChannel,
};
pub use intake::{
    intake_channel, DeliveryIntake, DeliveryRequest, IntakeDrain, IntakeError, IntakeWorker,
};
pub use orchestrator::{
    DeliveryHealth, DeliveryOrchestrator, DeliveryStats, DeliveryStatsSnapshot,
};
pub use retry::RetryPolicy;
pub use types::{
    BroadcastTarget, DeliveryErrorCode, DeliveryEvent, DeliveryMethod, DeliveryResult,
    Notification, Priority, UnknownDeliveryMethod,
};
