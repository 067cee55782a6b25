//! Token-bucket rate limiter keyed by client identifier.
//!
//! Buckets refill lazily at check time; there is no background refill task.
//! Locking is two-level: a short map-level lock for bucket lookup/creation and
//! a per-bucket lock for the refill-and-take arithmetic, so checks for
//! unrelated identifiers never contend on the bucket lock.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use quick_cache::unsync::Cache;
use serde::{Deserialize, Serialize};

use super::clock::{MonotonicClock, SystemClock};

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained refill rate in tokens per minute.
    pub per_minute: f64,
    /// Bucket capacity; also the number of back-to-back requests allowed.
    pub burst: f64,
    /// Maximum number of tracked identifiers. Least recently used buckets
    /// beyond this are evicted and start full if they return.
    pub max_buckets: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 600.0,
            burst: 20.0,
            max_buckets: 10_000,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
        }
    }

    /// `tokens = min(burst, tokens + elapsed_secs * per_minute / 60)`, then
    /// take one token if available.
    fn try_take(&mut self, now: Instant, per_minute: f64, burst: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_minute / 60.0).min(burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-identifier token buckets with bounded memory.
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn MonotonicClock>,
    buckets: Mutex<Cache<String, Arc<Mutex<Bucket>>>>,
}

impl TokenBucketLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn MonotonicClock>) -> Self {
        let capacity = config.max_buckets.max(1);
        Self {
            config,
            clock,
            buckets: Mutex::new(Cache::new(capacity)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admits one request for `identifier`, returning `false` when its bucket
    /// is empty.
    pub fn check(&self, identifier: &str) -> bool {
        let now = self.clock.now();
        let bucket = self.bucket(identifier, now);
        let mut bucket = bucket.lock();
        bucket.try_take(now, self.config.per_minute, self.config.burst)
    }

    /// Tokens currently available to `identifier`, without consuming any.
    #[must_use]
    pub fn available(&self, identifier: &str) -> f64 {
        let Some(bucket) = self.buckets.lock().get(identifier).cloned() else {
            return self.config.burst;
        };
        let bucket = bucket.lock();
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(bucket.last_refill)
            .as_secs_f64();
        (bucket.tokens + elapsed * self.config.per_minute / 60.0).min(self.config.burst)
    }

    /// Number of identifiers currently tracked.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    fn bucket(&self, identifier: &str, now: Instant) -> Arc<Mutex<Bucket>> {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get(identifier) {
            return Arc::clone(bucket);
        }
        let bucket = Arc::new(Mutex::new(Bucket::full(self.config.burst, now)));
        buckets.insert(identifier.to_owned(), Arc::clone(&bucket));
        bucket
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .field("buckets", &self.bucket_count())
            .finish_non_exhaustive()
    }
}
