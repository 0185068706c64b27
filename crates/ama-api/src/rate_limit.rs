//! Per-identifier token buckets.
//!
//! Each identifier (authenticated user id or client IP) gets its own
//! governor bucket, created on first use. Buckets idle for longer than
//! `idle_ttl` are evicted by a periodic sweep.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock, Reference};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use tracing::{debug, info};

type Bucket<C> =
    governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub burst: u32,
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 1,
            burst: 5,
            idle_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    fn quota(&self) -> Quota {
        let per_second = NonZeroU32::new(self.per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        Quota::per_second(per_second).allow_burst(burst)
    }
}

struct Entry<C: Clock> {
    bucket: Bucket<C>,
    last_seen: C::Instant,
}

pub struct RateLimiter<C: Clock = DefaultClock> {
    entries: Mutex<HashMap<String, Entry<C>>>,
    quota: Quota,
    idle_ttl: Duration,
    clock: C,
}

impl RateLimiter<DefaultClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock + Clone> RateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: config.quota(),
            idle_ttl: config.idle_ttl,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry<C>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take one token from the identifier's bucket.
    pub fn allow(&self, identifier: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries();

        let entry = entries.entry(identifier.to_owned()).or_insert_with(|| {
            debug!(identifier, "new rate limit bucket");
            Entry {
                bucket: Bucket::direct_with_clock(self.quota, self.clock.clone()),
                last_seen: now,
            }
        });

        entry.last_seen = now;
        entry.bucket.check().is_ok()
    }

    /// Evict buckets idle for longer than the configured TTL.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| {
            Duration::from(now.duration_since(entry.last_seen)) <= self.idle_ttl
        });
        before - entries.len()
    }

    /// Number of identifiers currently holding a bucket.
    pub fn tracked(&self) -> usize {
        self.entries().len()
    }
}

impl RateLimiter<DefaultClock> {
    pub async fn run_sweep_loop(self: std::sync::Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            interval.tick().await;
            let evicted = self.sweep_idle();
            if evicted > 0 {
                info!("Rate limiter: evicted {} idle buckets", evicted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn limiter() -> (RateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        (RateLimiter::with_clock(RateLimitConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn burst_then_refill_one_per_second() {
        let (limiter, clock) = limiter();

        for _ in 0..5 {
            assert!(limiter.allow("10.0.0.1"));
        }
        assert!(!limiter.allow("10.0.0.1"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn identifiers_are_independent() {
        let (limiter, _clock) = limiter();

        for _ in 0..5 {
            assert!(limiter.allow("alice"));
        }
        assert!(!limiter.allow("alice"));
        assert!(limiter.allow("bob"));
        assert_eq!(limiter.tracked(), 2);
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let (limiter, clock) = limiter();
        limiter.allow("stale");

        clock.advance(Duration::from_secs(4 * 60));
        limiter.allow("recent");

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn evicted_identifier_starts_with_a_full_bucket() {
        let (limiter, clock) = limiter();
        for _ in 0..6 {
            limiter.allow("client");
        }
        assert!(!limiter.allow("client"));

        clock.advance(Duration::from_secs(6 * 60));
        assert_eq!(limiter.sweep_idle(), 1);

        for _ in 0..5 {
            assert!(limiter.allow("client"));
        }
    }
}
