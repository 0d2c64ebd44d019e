//! Admission limiter configuration

use serde::Deserialize;

/// Bucket dimensions for one limiter profile
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProfileLimits {
    /// Bucket capacity (maximum burst)
    pub burst: u32,
    /// Sustained refill rate
    pub requests_per_minute: u32,
}

impl ProfileLimits {
    /// Refill rate in tokens per second
    pub fn refill_per_second(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }
}

/// Configuration for admission limiting
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Whether admission limiting is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Limits for connection-establishing and replay requests
    #[serde(default = "default_profile")]
    pub default_profile: ProfileLimits,
    /// Limits for administrative keys
    #[serde(default = "admin_profile")]
    pub admin_profile: ProfileLimits,
    /// Cleanup interval for stale buckets in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Time after which unused buckets are removed (seconds)
    #[serde(default = "default_bucket_ttl")]
    pub bucket_ttl_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_profile() -> ProfileLimits {
    ProfileLimits {
        burst: 10,
        requests_per_minute: 30,
    }
}

fn admin_profile() -> ProfileLimits {
    ProfileLimits {
        burst: 100,
        requests_per_minute: 600,
    }
}

fn default_cleanup_interval() -> u64 {
    60 // Clean up every minute
}

fn default_bucket_ttl() -> u64 {
    300 // Remove buckets unused for 5 minutes
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_profile: default_profile(),
            admin_profile: admin_profile(),
            cleanup_interval_seconds: default_cleanup_interval(),
            bucket_ttl_seconds: default_bucket_ttl(),
        }
    }
}
