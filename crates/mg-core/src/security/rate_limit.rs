//! Fixed-window attempt limiter with temporary blocking.
//!
//! Each key moves through three states: unseen, active window, and blocked.
//! The first attempt opens a window; attempts inside the window count up to
//! `max_attempts`; the attempt after that converts the key into a block for
//! `block_duration`. An expired window or an expired block returns the key to
//! unseen, so the next attempt starts a fresh window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;

/// Default number of attempts allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default window length (1 minute).
pub const DEFAULT_WINDOW_MS: i64 = 60_000;
/// Default block length (5 minutes).
pub const DEFAULT_BLOCK_MS: i64 = 300_000;

/// Limits applied by a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_ms: i64,
    pub block_duration_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_ms: DEFAULT_WINDOW_MS,
            block_duration_ms: DEFAULT_BLOCK_MS,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::milliseconds(self.block_duration_ms)
    }
}

/// Outcome of a single [`RateLimiter::check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RateLimitDecision {
    /// The attempt was counted; `remaining` more fit in the current window.
    Allowed { remaining: u32 },
    /// The key is blocked for another `remaining_seconds` (rounded up).
    Blocked { remaining_seconds: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn remaining(&self) -> Option<u32> {
        match self {
            Self::Allowed { remaining } => Some(*remaining),
            Self::Blocked { .. } => None,
        }
    }

    pub fn remaining_seconds(&self) -> Option<u64> {
        match self {
            Self::Allowed { .. } => None,
            Self::Blocked { remaining_seconds } => Some(*remaining_seconds),
        }
    }
}

/// Attempt history for one key inside its current window.
#[derive(Debug, Clone)]
struct RateRecord {
    count: u32,
    first_attempt: DateTime<Utc>,
    attempts: Vec<DateTime<Utc>>,
}

impl RateRecord {
    fn open(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            first_attempt: now,
            attempts: vec![now],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockRecord {
    unblock_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<String, RateRecord>,
    blocked: HashMap<String, BlockRecord>,
}

/// Per-key attempt limiter.
///
/// A key is tracked in either the window map or the block map, never both:
/// blocking a key drops its window.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count an attempt for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(block) = state.blocked.get(key).copied() {
            if now < block.unblock_at {
                return RateLimitDecision::Blocked {
                    remaining_seconds: ceil_seconds(block.unblock_at - now),
                };
            }
            debug!(key = %key, "Block expired, treating key as unseen");
            state.blocked.remove(key);
            state.windows.remove(key);
        }

        let max = self.config.max_attempts;
        let window = self.config.window();

        // An expired window is dropped here and the key falls through to a fresh one.
        let current = state
            .windows
            .remove(key)
            .filter(|r| now - r.first_attempt <= window);

        match current {
            Some(record) if record.count >= max => {
                let unblock_at = now
                    .checked_add_signed(self.config.block_duration())
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                state
                    .blocked
                    .insert(key.to_string(), BlockRecord { unblock_at });
                warn!(
                    key = %key,
                    attempts = record.attempts.len() + 1,
                    block_seconds = ceil_seconds(self.config.block_duration()),
                    "Rate limit exceeded, key blocked"
                );
                RateLimitDecision::Blocked {
                    remaining_seconds: ceil_seconds(unblock_at - now),
                }
            }
            Some(mut record) => {
                record.count += 1;
                record.attempts.push(now);
                let remaining = max - record.count;
                state.windows.insert(key.to_string(), record);
                RateLimitDecision::Allowed { remaining }
            }
            None => {
                state.windows.insert(key.to_string(), RateRecord::open(now));
                RateLimitDecision::Allowed {
                    remaining: max.saturating_sub(1),
                }
            }
        }
    }

    /// Number of attempts recorded in the current window for `key`.
    pub fn attempts(&self, key: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .windows
            .get(key)
            .map(|r| r.attempts.len())
            .unwrap_or(0)
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        let now = self.clock.now();
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .blocked
            .get(key)
            .map(|b| now < b.unblock_at)
            .unwrap_or(false)
    }

    /// Forget everything about `key`.
    pub fn reset(&self, key: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.windows.remove(key);
        state.blocked.remove(key);
    }

    /// Drop expired windows and blocks. Returns how many entries were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.config.window();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let before = state.windows.len() + state.blocked.len();
        state.windows.retain(|_, r| now - r.first_attempt <= window);
        state.blocked.retain(|_, b| now < b.unblock_at);
        before - (state.windows.len() + state.blocked.len())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

fn ceil_seconds(d: Duration) -> u64 {
    let ms = d.num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(RateLimitConfig::default(), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_first_attempt_allowed() {
        let (limiter, _clock) = limiter();
        assert_eq!(
            limiter.check("k"),
            RateLimitDecision::Allowed { remaining: 2 }
        );
    }

    #[test]
    fn test_remaining_strictly_decreases_then_blocks() {
        let (limiter, clock) = limiter();
        let mut remaining = Vec::new();
        for _ in 0..3 {
            let decision = limiter.check("k");
            assert!(decision.is_allowed());
            remaining.push(decision.remaining().unwrap());
            clock.advance(Duration::seconds(1));
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let fourth = limiter.check("k");
        assert!(fourth.is_blocked());
        assert_eq!(fourth.remaining_seconds(), Some(300));
        assert!(limiter.is_blocked("k"));
        assert_eq!(limiter.attempts("k"), 0);
    }

    #[test]
    fn test_blocked_reports_shrinking_wait() {
        let (limiter, clock) = limiter();
        for _ in 0..4 {
            limiter.check("k");
        }
        clock.advance(Duration::seconds(100));
        assert_eq!(
            limiter.check("k"),
            RateLimitDecision::Blocked {
                remaining_seconds: 200
            }
        );
        clock.advance(Duration::milliseconds(199_500));
        assert_eq!(limiter.check("k").remaining_seconds(), Some(1));
    }

    #[test]
    fn test_block_expiry_starts_fresh_window() {
        let (limiter, clock) = limiter();
        for _ in 0..4 {
            limiter.check("k");
        }
        clock.advance(Duration::milliseconds(DEFAULT_BLOCK_MS));
        assert_eq!(
            limiter.check("k"),
            RateLimitDecision::Allowed { remaining: 2 }
        );
        assert!(!limiter.is_blocked("k"));
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let (limiter, clock) = limiter();
        limiter.check("k");
        limiter.check("k");
        clock.advance(Duration::milliseconds(DEFAULT_WINDOW_MS + 1));
        assert_eq!(
            limiter.check("k"),
            RateLimitDecision::Allowed { remaining: 2 }
        );
        assert_eq!(limiter.attempts("k"), 1);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let (limiter, clock) = limiter();
        limiter.check("k");
        clock.advance(Duration::milliseconds(DEFAULT_WINDOW_MS));
        assert_eq!(
            limiter.check("k"),
            RateLimitDecision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter();
        for _ in 0..4 {
            limiter.check("a");
        }
        assert!(limiter.is_blocked("a"));
        assert_eq!(
            limiter.check("b"),
            RateLimitDecision::Allowed { remaining: 2 }
        );
    }

    #[test]
    fn test_reset_clears_block() {
        let (limiter, _clock) = limiter();
        for _ in 0..4 {
            limiter.check("k");
        }
        limiter.reset("k");
        assert!(limiter.check("k").is_allowed());
    }

    #[test]
    fn test_purge_expired() {
        let (limiter, clock) = limiter();
        limiter.check("window");
        for _ in 0..4 {
            limiter.check("blocked");
        }
        clock.advance(Duration::milliseconds(DEFAULT_BLOCK_MS + 1));
        assert_eq!(limiter.purge_expired(), 2);
        assert_eq!(limiter.purge_expired(), 0);
    }

    #[test]
    fn test_custom_config() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(
            RateLimitConfig {
                max_attempts: 1,
                window_ms: 1_000,
                block_duration_ms: 10_000,
            },
            clock,
        );
        assert_eq!(
            limiter.check("k"),
            RateLimitDecision::Allowed { remaining: 0 }
        );
        assert_eq!(limiter.check("k").remaining_seconds(), Some(10));
    }

    #[test]
    fn test_oversized_block_saturates() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(
            RateLimitConfig {
                block_duration_ms: i64::MAX,
                ..RateLimitConfig::default()
            },
            clock,
        );
        for _ in 0..3 {
            assert!(limiter.check("k").is_allowed());
        }
        assert!(limiter.check("k").is_blocked());
        assert!(limiter.is_blocked("k"));
    }
}
