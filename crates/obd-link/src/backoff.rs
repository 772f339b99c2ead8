//! Retry Backoff

use std::time::Duration;

/// Wait between failed channel/connect attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Decides how long to wait after a failed attempt
pub trait BackoffPolicy: Send {
    /// Delay after failed attempt number `attempt` (1-based)
    fn delay(&mut self, attempt: u32) -> Duration;
}

impl<F> BackoffPolicy for F
where
    F: FnMut(u32) -> Duration + Send,
{
    fn delay(&mut self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// Same delay after every failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    interval: Duration,
}

impl FixedBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL)
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&mut self, _attempt: u32) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let mut backoff = FixedBackoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(50), Duration::from_secs(2));
    }

    #[test]
    fn test_closure_backoff() {
        let mut backoff = |attempt: u32| Duration::from_millis(100 * attempt as u64);
        assert_eq!(BackoffPolicy::delay(&mut backoff, 3), Duration::from_millis(300));
    }
}
