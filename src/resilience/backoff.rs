//! Exponential backoff with jitter, used when `accept()` keeps failing.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based): `base_ms * 2^(attempt-1)`,
/// capped at `max_ms`, plus up to 10% jitter. Attempt 0 waits nothing.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let Some(doublings) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };
    let factor = 1u64.checked_shl(doublings.min(63)).unwrap_or(u64::MAX);
    let delay = base_ms.saturating_mul(factor).min(max_ms);

    let jitter = match delay / 10 {
        0 => 0,
        spread => rand::thread_rng().gen_range(0..spread),
    };
    Duration::from_millis(delay + jitter)
}

/// Consecutive-failure counter feeding [`calculate_backoff`].
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            failures: 0,
            base_ms,
            max_ms,
        }
    }

    /// Record one more failure and return how long to wait.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        calculate_backoff(self.failures, self.base_ms, self.max_ms)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_up_to_the_cap() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);
        assert!(calculate_backoff(1, 100, 2000) >= Duration::from_millis(100));
        assert!(calculate_backoff(2, 100, 2000) >= Duration::from_millis(200));

        let capped = calculate_backoff(40, 100, 1000);
        assert!(capped >= Duration::from_millis(1000));
        assert!(capped < Duration::from_millis(1100));
        assert!(calculate_backoff(u32::MAX, 5, 1000) < Duration::from_millis(1100));
    }

    #[test]
    fn backoff_grows_and_resets() {
        let mut backoff = Backoff::new(10, 1000);
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        let third = backoff.next_delay();
        assert!(first >= Duration::from_millis(10) && first < Duration::from_millis(20));
        assert!(second >= Duration::from_millis(20));
        assert!(third >= Duration::from_millis(40));

        backoff.reset();
        assert!(backoff.next_delay() < Duration::from_millis(20));
    }
}
