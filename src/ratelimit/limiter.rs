//! Admission limiter keyed by `(key, endpoint class)`

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::metrics::RateLimitMetrics;

use super::config::{ProfileLimits, RateLimitConfig};
use super::token_bucket::TokenBucket;

/// Class of endpoint a request is admitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    /// Opening a persistent stream
    Connect,
    /// Replay and heartbeat acknowledgments
    Replay,
    /// Stats, health and producer endpoints
    Admin,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Connect => "connect",
            EndpointClass::Replay => "replay",
            EndpointClass::Admin => "admin",
        }
    }

    /// Limiter profile whose buckets serve this class
    pub fn profile(&self) -> LimiterProfile {
        match self {
            EndpointClass::Admin => LimiterProfile::Admin,
            EndpointClass::Connect | EndpointClass::Replay => LimiterProfile::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterProfile {
    Default,
    Admin,
}

impl LimiterProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterProfile::Default => "default",
            LimiterProfile::Admin => "admin",
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed { remaining: u32, limit: u32 },
    /// Request is denied; the caller should back off for `retry_after` seconds
    Denied { retry_after: u64, limit: u32 },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Token-bucket admission limiter.
///
/// Buckets live in a `DashMap` and are mutated under the shard lock, so
/// refill-and-consume is atomic per `(key, class)`.
pub struct AdmissionLimiter {
    buckets: DashMap<(String, EndpointClass), TokenBucket>,
    config: RateLimitConfig,
}

impl AdmissionLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn limits(&self, profile: LimiterProfile) -> ProfileLimits {
        match profile {
            LimiterProfile::Default => self.config.default_profile,
            LimiterProfile::Admin => self.config.admin_profile,
        }
    }

    /// Consume one token for `key` on `class`. Returns false when the caller must back off.
    pub fn allow(&self, key: &str, class: EndpointClass) -> bool {
        self.check(key, class).is_allowed()
    }

    /// Consume one token and report the bucket state
    pub fn check(&self, key: &str, class: EndpointClass) -> RateLimitResult {
        let profile = class.profile();
        let limits = self.limits(profile);

        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
                limit: limits.burst,
            };
        }

        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((key.to_string(), class))
            .or_insert_with(|| TokenBucket::new_at(limits.burst, limits.refill_per_second(), now));

        let result = if bucket.try_consume_at(now) {
            RateLimitResult::Allowed {
                remaining: bucket.available_at(now),
                limit: limits.burst,
            }
        } else {
            let wait = bucket.retry_after();
            RateLimitResult::Denied {
                retry_after: wait.as_secs_f64().ceil().max(1.0) as u64,
                limit: limits.burst,
            }
        };
        drop(bucket);

        if result.is_allowed() {
            RateLimitMetrics::record_allowed(profile.as_str(), class.as_str());
        } else {
            RateLimitMetrics::record_denied(profile.as_str(), class.as_str());
            tracing::debug!(key = %key, class = class.as_str(), "Admission denied");
        }

        result
    }

    /// Clean up buckets that haven't been used recently
    pub fn cleanup_stale(&self) -> usize {
        let ttl = Duration::from_secs(self.config.bucket_ttl_seconds);
        let now = Instant::now();
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| bucket.idle_for(now) < ttl);

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(
                removed = removed,
                buckets = self.buckets.len(),
                "Cleaned up stale admission buckets"
            );
        }
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        let admin_buckets = self
            .buckets
            .iter()
            .filter(|entry| entry.key().1.profile() == LimiterProfile::Admin)
            .count();
        RateLimiterStats {
            enabled: self.config.enabled,
            total_buckets: self.buckets.len(),
            admin_buckets,
            default_burst: self.config.default_profile.burst,
            admin_burst: self.config.admin_profile.burst,
        }
    }
}

/// Statistics about the admission limiter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub total_buckets: usize,
    pub admin_buckets: usize,
    pub default_burst: u32,
    pub admin_burst: u32,
}
