use std::time::Duration;
use rand::Rng;
use crate::services::config_service::RealtimeConfig;

/// Capped exponential backoff: attempt `n` waits `min(initial * 2^n, max)`,
/// plus up to 10% jitter when enabled.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempt: 0,
            jitter: true,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.max_reconnect_attempts,
        )
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        let mut delay = self.base_delay(self.attempt);
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 10);
            delay += Duration::from_millis(extra);
        }

        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_the_cap() {
        let mut backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 5).without_jitter();

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff =
            Backoff::new(Duration::from_millis(100), Duration::from_secs(10), 3).without_jitter();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let mut backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_secs(30), 50);
        for attempt in 0..6 {
            let base = backoff.base_delay(attempt);
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= base);
            assert!(delay <= base + base / 10);
        }
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_the_cap() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 100);
        assert_eq!(backoff.base_delay(40), Duration::from_secs(30));
    }
}
