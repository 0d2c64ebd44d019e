//! Token Bucket algorithm implementation

use std::time::{Duration, Instant};

/// Token Bucket for rate limiting.
///
/// Tokens refill continuously at `refill_per_second` up to `capacity`.
/// Fractional tokens are kept so slow rates (a few per minute) refill
/// accurately. Callers serialize access (the limiter holds buckets in a
/// sharded map and mutates them under the shard lock).
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: u32,
    refill_per_second: f64,
}

impl TokenBucket {
    /// Create a new, full token bucket
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self::new_at(capacity, refill_per_second, Instant::now())
    }

    pub fn new_at(capacity: u32, refill_per_second: f64, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: now,
            capacity,
            refill_per_second: refill_per_second.max(0.0),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Try to consume one token from the bucket.
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        self.available_at(Instant::now())
    }

    pub fn available_at(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_per_second)
            .min(self.capacity as f64)
            .floor() as u32
    }

    /// Time until the bucket holds at least one token
    pub fn retry_after(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_second)
    }

    /// How long the bucket has gone without a refill (i.e. without a request)
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
