//! # Fibonacci Backoff
//!
//! Backoff used by the error policy when a pass fails before it could record
//! its outcome. Delays walk the Fibonacci sequence scaled to whole seconds,
//! clamped to `[min, max]`.

/// Stateful Fibonacci backoff measured in seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibonacciBackoff {
    min_secs: u64,
    max_secs: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
            previous: 0,
            current: min_secs,
        }
    }

    /// Return the next delay and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let delay = self.current.clamp(self.min_secs, self.max_secs);
        if self.current < self.max_secs {
            let next = self.previous.saturating_add(self.current);
            self.previous = self.current;
            self.current = next;
        }
        delay
    }

    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = self.min_secs;
    }

    /// Delay for the `error_count`-th consecutive error without keeping state
    pub fn calculate_for_error_count(error_count: u32, min_secs: u64, max_secs: u64) -> u64 {
        let mut backoff = Self::new(min_secs, max_secs);
        let mut delay = backoff.next_backoff_seconds();
        for _ in 1..error_count {
            delay = backoff.next_backoff_seconds();
        }
        delay
    }
}
