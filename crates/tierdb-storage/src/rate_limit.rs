//! Token bucket rate limiter for table writes and compaction.
//!
//! Tokens are bytes. The bucket refills at `rate` bytes per second up to
//! one second worth of budget. `acquire(n)` blocks the calling worker
//! until the budget admits `n` bytes; a request larger than the bucket is
//! admitted once the bucket is full and leaves it in debt, so oversized
//! blocks slow down later writers instead of deadlocking.
//! [`RateLimiter::acquire_or_cancel`] gives up as soon as a cancel flag is
//! raised, so a throttled compaction never holds up shutdown.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tierdb_core::{Error, Result};

/// Longest single sleep while waiting for tokens
const MAX_SLEEP: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub rate_per_sec: u64,
    pub bytes_acquired: u64,
    pub total_wait_us: u64,
    pub throttled: u64,
}

/// Thread-safe byte-rate limiter. A rate of 0 means unlimited.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    rate_per_sec: u64,
    capacity: f64,
    bucket: Mutex<Bucket>,
    bytes_acquired: AtomicU64,
    total_wait_us: AtomicU64,
    throttled: AtomicU64,
}

impl RateLimiter {
    pub fn new(name: &'static str, rate_per_sec: u64) -> Self {
        let capacity = rate_per_sec as f64;
        Self {
            name,
            rate_per_sec,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            bytes_acquired: AtomicU64::new(0),
            total_wait_us: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    pub fn unlimited(name: &'static str) -> Self {
        Self::new(name, 0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate_per_sec == 0
    }

    pub fn rate_per_sec(&self) -> u64 {
        self.rate_per_sec
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec as f64).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Try to take `bytes` without blocking
    pub fn try_acquire(&self, bytes: u64) -> bool {
        if self.is_unlimited() {
            self.bytes_acquired.fetch_add(bytes, Ordering::Relaxed);
            return true;
        }

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        let needed = (bytes as f64).min(self.capacity);
        if bucket.tokens >= needed {
            bucket.tokens -= bytes as f64;
            self.bytes_acquired.fetch_add(bytes, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Block until `bytes` fit in the budget. Returns the time spent waiting.
    pub fn acquire(&self, bytes: u64) -> Duration {
        self.wait_for(bytes, None).unwrap_or_default()
    }

    /// Like [`acquire`](Self::acquire), but fails with [`Error::Cancelled`]
    /// once `cancel` is set. A cancelled request takes no tokens.
    pub fn acquire_or_cancel(&self, bytes: u64, cancel: &AtomicBool) -> Result<Duration> {
        self.wait_for(bytes, Some(cancel)).ok_or(Error::Cancelled)
    }

    /// `None` when cancelled before admission
    fn wait_for(&self, bytes: u64, cancel: Option<&AtomicBool>) -> Option<Duration> {
        let cancelled = || cancel.is_some_and(|c| c.load(Ordering::Relaxed));
        if cancelled() {
            return None;
        }
        if self.is_unlimited() || bytes == 0 {
            self.bytes_acquired.fetch_add(bytes, Ordering::Relaxed);
            return Some(Duration::ZERO);
        }

        let start = Instant::now();
        let needed = (bytes as f64).min(self.capacity);
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                if bucket.tokens >= needed {
                    bucket.tokens -= bytes as f64;
                    break;
                }
                let deficit = needed - bucket.tokens;
                Duration::from_secs_f64(deficit / self.rate_per_sec as f64)
            };
            thread::sleep(wait.clamp(Duration::from_micros(50), MAX_SLEEP));
            if cancelled() {
                return None;
            }
        }

        let waited = start.elapsed();
        self.bytes_acquired.fetch_add(bytes, Ordering::Relaxed);
        if waited > Duration::ZERO {
            self.total_wait_us
                .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        }
        if waited >= Duration::from_millis(1) {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(limiter = self.name, bytes, waited_us = waited.as_micros() as u64, "throttled");
        }
        Some(waited)
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            rate_per_sec: self.rate_per_sec,
            bytes_acquired: self.bytes_acquired.load(Ordering::Relaxed),
            total_wait_us: self.total_wait_us.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}
