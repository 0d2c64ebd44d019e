//! Admission limiting using the Token Bucket algorithm.
//!
//! Guards connection-establishing, replay and administrative endpoints.
//! Every `(key, endpoint class)` pair gets its own bucket; administrative
//! endpoints draw from a separate, higher-throughput profile.

mod config;
mod limiter;
mod token_bucket;

pub use config::{ProfileLimits, RateLimitConfig};
pub use limiter::{AdmissionLimiter, EndpointClass, LimiterProfile, RateLimitResult, RateLimiterStats};
pub use token_bucket::TokenBucket;
