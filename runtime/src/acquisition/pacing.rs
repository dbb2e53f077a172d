//! Sleep-based pacing between page loads.
//!
//! Every job waits a fixed base delay after each request; a little random
//! jitter is added so request timing is not perfectly regular.

use rand::Rng;
use std::time::Duration;

/// Generate a random delay between min_ms and max_ms.
pub fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}

/// Random extra delay in `0..=max`.
pub fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    random_delay(0, max.as_millis() as u64)
}

/// `base` plus up to 10% jitter.
pub fn settle_delay(base: Duration) -> Duration {
    base + jitter(base / 10)
}

/// Sleep for `base` plus jitter. A zero base returns immediately.
pub async fn pause(base: Duration) {
    if base.is_zero() {
        return;
    }
    tokio::time::sleep(settle_delay(base)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_delay_in_range() {
        for _ in 0..50 {
            let d = random_delay(100, 200);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
        assert_eq!(random_delay(300, 100), Duration::from_millis(300));
    }

    #[test]
    fn test_settle_delay_bounds() {
        let base = Duration::from_secs(2);
        for _ in 0..20 {
            let d = settle_delay(base);
            assert!(d >= base && d <= base + Duration::from_millis(200));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
