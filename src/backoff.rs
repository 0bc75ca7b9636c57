use std::cmp::min;
use std::time::Duration;

/// Delays between retries of a non-blocking call that reported a transient condition. The
///  delay grows by a factor (in eighths) per retry up to a maximum.
pub struct RetryBackoff {
    delay: Duration,

    config_max_delay: Duration,
    config_factor_eighths: u32,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        RetryBackoff::new(Duration::from_millis(1), Duration::from_millis(500))
    }
}

impl RetryBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        let result = RetryBackoff {
            delay: initial_delay,
            config_max_delay: max_delay,
            config_factor_eighths: 8*2,
        };

        assert!(result.config_factor_eighths >= 8);

        result
    }

    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let result = self.delay;
        self.delay = min((self.delay * self.config_factor_eighths) / 8, self.config_max_delay);
        result
    }
}
