// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Delivery core
pub mod circuit_breaker;
pub mod connection_manager;
pub mod delivery;
pub mod event_store;
pub mod ratelimit;

// Application layer
pub mod api;
pub mod auth;
pub mod server;
pub mod sse;

// Supporting modules
pub mod shutdown;
pub mod tasks;
