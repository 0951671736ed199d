//! In-memory rate limiting for inbound WebSocket frames.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<String, VecDeque<Instant>>`,
//! one deque of send timestamps per connected player. On every inbound frame
//! the window is pruned and the frame rejected if the pruned deque is already
//! at the limit. This is a strict cap — bursts never borrow from the next
//! window. Rejected frames are dropped silently; the sender gets no reply.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_LIMIT: usize = 10;
const DEFAULT_WINDOW_MS: u64 = 1000;

#[derive(Clone, Copy)]
struct RateLimitConfig {
    limit: usize,
    window: Duration,
}

impl RateLimitConfig {
    fn from_env() -> Self {
        let window_ms = env_parse("RATE_LIMIT_WINDOW_MS", DEFAULT_WINDOW_MS);
        Self {
            limit: env_parse("RATE_LIMIT_PER_PLAYER", DEFAULT_LIMIT),
            window: Duration::from_millis(window_ms),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded (max {limit} messages/{window_ms}ms)")]
    Exceeded { limit: usize, window_ms: u64 },
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            config: RateLimitConfig::from_env(),
        }
    }

    /// Check the player's window, then record the message.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Exceeded`] when the window already holds the
    /// maximum number of messages. The caller drops the frame.
    pub fn check_and_record(&self, player_id: &str) -> Result<(), RateLimitError> {
        self.check_and_record_at(player_id, Instant::now())
    }

    /// Internal: check + record with explicit timestamp (for testing).
    fn check_and_record_at(&self, player_id: &str, now: Instant) -> Result<(), RateLimitError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let cfg = self.config;

        let deque = inner.entry(player_id.to_owned()).or_default();
        prune_window(deque, now, cfg.window);
        if deque.len() >= cfg.limit {
            return Err(RateLimitError::Exceeded {
                limit: cfg.limit,
                window_ms: u64::try_from(cfg.window.as_millis()).unwrap_or(u64::MAX),
            });
        }

        deque.push_back(now);
        Ok(())
    }

    /// Drop the history of a disconnected player.
    pub fn forget(&self, player_id: &str) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.remove(player_id);
    }

    #[cfg(test)]
    fn tracked_players(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Drop timestamps that have left the window. A timestamp exactly one window
/// old no longer counts, so a full window frees up as soon as it slides past
/// the oldest entry.
fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
