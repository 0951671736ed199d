//! Reconnect backoff policy.
//!
//! Delays double from one second per failed attempt, capped at thirty
//! seconds, and the client gives up for good after five attempts. The policy
//! is pure so the ladder can be tested without waiting on timers.

use std::time::Duration;

const INITIAL_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 30_000;
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self { attempts: 0, max_attempts: MAX_ATTEMPTS }
    }

    #[cfg(test)]
    fn with_max_attempts(max_attempts: u32) -> Self {
        Self { attempts: 0, max_attempts }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let shift = self.attempts.min(31);
        let delay_ms = INITIAL_DELAY_MS.saturating_mul(1_u64 << shift).min(MAX_DELAY_MS);
        self.attempts += 1;
        Some(Duration::from_millis(delay_ms))
    }

    /// Clear the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts consumed so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
