use std::time::Duration;

/// Reconnect delay schedule: starts at `initial`, grows by a fixed
/// `increment` per consecutive unresolved error, capped at `max`. Any
/// successfully received typed event resets it.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    initial: Duration,
    increment: Duration,
    max: Duration,
    current: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(200),
            Duration::from_millis(1000),
            Duration::from_millis(10_000),
        )
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, increment: Duration, max: Duration) -> Self {
        Self {
            initial,
            increment,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt. Bumps the schedule for
    /// the attempt after this one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current + self.increment).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}
