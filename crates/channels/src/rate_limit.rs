//! Token bucket for outbound `message/send` calls.
//!
//! One limiter is shared by every configuration a gateway sends for; the 企业微信
//! per-app quota is far above what a single relay produces, so the bucket only
//! smooths bursts such as long texts split into many chunks.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Bucket {
    capacity: f64,
    tokens: f64,
    per_second: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, per_second: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// `None` when a token was taken, otherwise how long until one is available.
    fn take(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / self.per_second))
        }
    }
}

pub struct SendRateLimiter(Mutex<Bucket>);

impl SendRateLimiter {
    /// Burst capacity equals the sustained rate; a rate of 0 is treated as 1/s.
    pub fn per_second(rate: u32) -> Self {
        let rate = rate.max(1);
        Self(Mutex::new(Bucket::new(rate, rate as f64)))
    }

    /// Take one send slot, sleeping until one frees up.
    pub async fn acquire(&self) {
        loop {
            let wait = self.0.lock().await.take(Instant::now());
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub async fn try_acquire(&self) -> bool {
        self.0.lock().await.take(Instant::now()).is_none()
    }
}

impl Default for SendRateLimiter {
    fn default() -> Self {
        Self::per_second(20)
    }
}
