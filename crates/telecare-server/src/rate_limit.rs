//! Inbound frame rate limiting, one token bucket per connection.
//!
//! Each socket task owns its limiter, so no locking is involved. A frame
//! that finds the bucket empty is answered with an `error` envelope and
//! otherwise ignored.

use std::time::Instant;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameLimiter {
    bucket: TokenBucket,
    rate: f64,
    capacity: f64,
}

impl FrameLimiter {
    /// `rate` frames per second sustained, bursts up to `capacity`.
    /// A zero rate disables limiting.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            bucket: TokenBucket::new(capacity, Instant::now()),
            rate,
            capacity,
        }
    }

    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    pub fn check_at(&mut self, now: Instant) -> bool {
        if self.rate <= 0.0 {
            return true;
        }
        self.bucket.try_consume(self.rate, self.capacity, now)
    }
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new(20.0, 60.0)
    }
}
