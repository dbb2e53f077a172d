//! Request pacing: a concurrency cap and a minimum gap between requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Rate limiter that enforces concurrency limits and minimum delays.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_delay: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// - `max_concurrent`: maximum number of in-flight requests
    /// - `min_delay`: minimum time between the start of two requests
    pub fn new(max_concurrent: usize, min_delay: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_delay,
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    /// A sequential limiter: one request at a time, `delay` apart.
    pub fn sequential(delay: Duration) -> Self {
        Self::new(1, delay)
    }

    /// Wait until the limiter allows another request.
    ///
    /// The first request never waits.
    pub async fn acquire(&self) -> RateLimitGuard {
        let permit = self.semaphore.clone().acquire_owned().await.ok();

        {
            let mut last = self.last_request.lock().await;
            if let Some(previous) = *last {
                let wanted = self.min_delay;
                let elapsed = previous.elapsed();
                if elapsed < wanted {
                    tokio::time::sleep(wanted - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        RateLimitGuard { _permit: permit }
    }
}

/// Guard that releases the rate limiter permit when dropped.
pub struct RateLimitGuard {
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
}
