//! Capped exponential backoff shared by both synchronization phases.

use std::time::Duration;

/// First delay after a failure.
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Upper bound on any single delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Doubling delay schedule: 2, 4, 8, 16, 30, 30, ... seconds.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a schedule with the standard 2s base and 30s cap.
    pub fn new() -> Self {
        Self::with_bounds(BACKOFF_BASE, BACKOFF_CAP)
    }

    /// Creates a schedule with custom bounds.
    pub fn with_bounds(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base.min(cap),
        }
    }

    /// Returns the delay to wait now and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }

    /// Returns the delay the next failure would wait, without advancing.
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Returns to the base delay after a success.
    pub fn reset(&mut self) {
        self.current = self.base.min(self.cap);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = Backoff::new();
        let secs: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();

        assert_eq!(secs, vec![2, 4, 8, 16, 30, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.peek(), Duration::from_secs(16));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_custom_bounds() {
        let mut backoff = Backoff::with_bounds(Duration::from_millis(100), Duration::from_millis(250));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }
}
