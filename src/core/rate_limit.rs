use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Returned by [`RateLimiter::wait`] when the token is cancelled before a
/// slot becomes available.
#[derive(Debug, Error)]
#[error("rate limiter wait cancelled")]
pub struct WaitCancelled;

struct Bucket {
    tokens: f64,
    updated: Instant,
}

/// A token bucket. One instance is shared by all workers of a state, so the
/// rate bounds the state's aggregate throughput, not each worker's.
pub struct RateLimiter {
    interval: Duration,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A limiter minting `rate_per_sec` tokens per second with the given
    /// burst capacity. `rate_per_sec` must be positive.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self::every(Duration::from_secs_f64(1.0 / rate_per_sec), burst)
    }

    /// A limiter minting one token per `interval`.
    pub fn every(interval: Duration, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            interval,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                updated: Instant::now(),
            }),
        }
    }

    /// Take one token, suspending until one is minted. Cancellable.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), WaitCancelled> {
        loop {
            let delay = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let minted = now.duration_since(bucket.updated).as_secs_f64()
                    / self.interval.as_secs_f64();
                bucket.tokens = (bucket.tokens + minted).min(self.burst);
                bucket.updated = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                self.interval.mul_f64(1.0 - bucket.tokens)
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(WaitCancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
