use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::ratelimit::RateLimitConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub event_store: EventStoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Administrative API access
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Key expected in `X-API-Key` for producer and admin endpoints.
    /// When unset, those endpoints are open (development mode).
    pub key: Option<String>,
}

/// Primary pub/sub channel settings.
///
/// Leaving `url` unset selects the unconfigured primary channel and every
/// delivery goes through the SSE fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Prefix for published channel names (`{prefix}:user:{id}`, `{prefix}:broadcast`)
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

/// Delay strategy between primary delivery attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum primary attempts per delivery
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    /// Delay before the second attempt (ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Upper bound for exponential delays (ms)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    /// Jitter factor (0.0 to 1.0) applied to exponential delays
    #[serde(default)]
    pub retry_jitter: f64,
    /// Timeout for a single primary publish (ms)
    #[serde(default = "default_primary_timeout_ms")]
    pub primary_timeout_ms: u64,
    /// Buffer size of the producer intake channel
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseConfig {
    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Per-recipient connection cap; the oldest connection is evicted past it
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    /// Process-wide connection ceiling; new connections are rejected past it
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,
    /// Outbound queue depth per connection
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Timeout for a single frame write into a connection queue (ms)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Drop connections whose last heartbeat ack is older than this. 0 disables the sweep.
    #[serde(default)]
    pub stale_timeout: u64,
    /// Stale connection sweep interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Reconnect delay suggested to clients on shutdown
    #[serde(default = "default_reconnect_after")]
    pub reconnect_after_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventStoreConfig {
    /// Ring buffer size per recipient
    #[serde(default = "default_max_events_per_user")]
    pub max_events_per_user: usize,
    /// Retention for stored events in seconds
    #[serde(default = "default_event_ttl")]
    pub ttl_seconds: u64,
    /// `maxEvents` used when a replay request omits it
    #[serde(default = "default_replay_limit")]
    pub default_replay_limit: usize,
    /// Hard ceiling for `maxEvents`
    #[serde(default = "default_max_replay_limit")]
    pub max_replay_limit: usize,
    #[serde(default = "default_event_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit JSON formatted logs instead of the human readable format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_channel_prefix() -> String {
    "notification".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_primary_timeout_ms() -> u64 {
    5_000
}

fn default_intake_capacity() -> usize {
    1024
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_max_connections_per_user() -> usize {
    5
}

fn default_max_total_connections() -> usize {
    10_000
}

fn default_channel_capacity() -> usize {
    64
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_reconnect_after() -> u64 {
    5
}

fn default_max_events_per_user() -> usize {
    100
}

fn default_event_ttl() -> u64 {
    3_600 // 1 hour
}

fn default_replay_limit() -> usize {
    50
}

fn default_max_replay_limit() -> usize {
    500
}

fn default_event_cleanup_interval() -> u64 {
    300
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "notification-delivery-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    /// Load settings from defaults, `config/default`, `config/{RUN_MODE}` and the environment.
    ///
    /// Environment keys use `__` between sections, e.g. `CIRCUIT_BREAKER__FAILURE_THRESHOLD`.
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("sse.heartbeat_interval", 30)?
            .set_default("sse.max_connections_per_user", 5)?
            .set_default("delivery.max_retries", 3)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            channel_prefix: default_channel_prefix(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_strategy: RetryStrategy::default(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_jitter: 0.0,
            primary_timeout_ms: default_primary_timeout_ms(),
            intake_capacity: default_intake_capacity(),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            max_connections_per_user: default_max_connections_per_user(),
            max_total_connections: default_max_total_connections(),
            channel_capacity: default_channel_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            stale_timeout: 0,
            cleanup_interval: default_cleanup_interval(),
            reconnect_after_seconds: default_reconnect_after(),
        }
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            max_events_per_user: default_max_events_per_user(),
            ttl_seconds: default_event_ttl(),
            default_replay_limit: default_replay_limit(),
            max_replay_limit: default_max_replay_limit(),
            cleanup_interval_seconds: default_event_cleanup_interval(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}
