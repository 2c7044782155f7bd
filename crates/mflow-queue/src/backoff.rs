//! Retry backoff.

use std::time::Duration;

/// Delay before the next attempt once a job has `attempts` failed attempts:
/// `base * 2^attempts`, capped at `max_delay`.
pub fn retry_delay(base: Duration, attempts: u32, max_delay: Duration) -> Duration {
    let exponent = attempts.min(31);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        assert_eq!(retry_delay(base, 1, max), Duration::from_secs(10));
        assert_eq!(retry_delay(base, 2, max), Duration::from_secs(20));
        assert_eq!(retry_delay(base, 3, max), Duration::from_secs(40));
        assert_eq!(retry_delay(base, 4, max), Duration::from_secs(60));
        assert_eq!(retry_delay(base, u32::MAX, max), Duration::from_secs(60));
    }

    #[test]
    fn test_first_retry_waits_twice_the_base() {
        assert_eq!(
            retry_delay(Duration::from_secs(5), 1, Duration::from_secs(600)),
            Duration::from_secs(10)
        );
        assert_eq!(
            retry_delay(Duration::from_millis(100), 0, Duration::from_secs(1)),
            Duration::from_millis(100)
        );
    }
}
