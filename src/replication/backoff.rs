use crate::config::ReplicationConfig;
use rand::Rng;
use std::time::Duration;

/// Doubling reconnect delay with jitter, capped and resettable.
///
/// Each delay is drawn from the upper half of the current step so that
/// listeners failing together do not reconnect together.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    step: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            step: base,
            attempts: 0,
        }
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.backoff_base(), config.backoff_max())
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let step_ms = self.step.as_millis() as u64;
        let half = step_ms / 2;
        let jitter = if half > 0 {
            rand::thread_rng().gen_range(0..=half)
        } else {
            0
        };
        let delay = Duration::from_millis(step_ms - half + jitter);

        self.attempts = self.attempts.saturating_add(1);
        self.step = self.step.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the base delay after a successful read
    pub fn reset(&mut self) {
        self.step = self.base;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn current_step(&self) -> Duration {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_within_jitter_bounds() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        for expected_step in [100u64, 200, 400, 800] {
            let delay = backoff.next_delay().as_millis() as u64;
            assert!(delay >= expected_step / 2, "{} < {}", delay, expected_step / 2);
            assert!(delay <= expected_step, "{} > {}", delay, expected_step);
        }
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn test_step_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(300));
        for _ in 0..10 {
            assert!(backoff.next_delay() <= Duration::from_millis(300));
        }
        assert_eq!(backoff.current_step(), Duration::from_millis(300));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current_step(), Duration::from_millis(50));
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(50));
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(backoff.current_step(), Duration::from_millis(500));
    }
}
