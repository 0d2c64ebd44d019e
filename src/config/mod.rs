mod settings;

pub use settings::{
    ApiConfig, DeliveryConfig, EventStoreConfig, JwtConfig, OtelConfig, RedisConfig,
    RetryStrategy, ServerConfig, Settings, SseConfig,
};

pub use crate::circuit_breaker::CircuitBreakerConfig;
pub use crate::ratelimit::{ProfileLimits, RateLimitConfig};
