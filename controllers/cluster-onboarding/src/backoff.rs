//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciles. The sequence grows in minutes
//! (1m, 1m, 2m, 3m, 5m, 8m, then capped at 10m with the defaults) and starts
//! over once a key reconciles successfully.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_minutes`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Backoff starting at `min_minutes` (twice) and capped at `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next_minutes.min(self.max_minutes);
        delay
    }

    /// Start over from `min_minutes`
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

/// Per-key backoff state shared by the work queue and the secret controller
#[derive(Debug)]
pub struct Backoffs {
    min_minutes: u64,
    max_minutes: u64,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl Backoffs {
    /// Empty set of backoffs sharing `min_minutes` and `max_minutes`
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, FibonacciBackoff>> {
        // A panic while holding the lock cannot leave a backoff half-updated
        self.states.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Delay before retrying `key` after another failure
    pub fn next_for(&self, key: &str) -> Duration {
        let (min, max) = (self.min_minutes, self.max_minutes);
        self.states()
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(min, max))
            .next_backoff()
    }

    /// Forget the failure history of `key` (on successful reconciliation)
    pub fn reset(&self, key: &str) {
        self.states().remove(key);
    }
}
