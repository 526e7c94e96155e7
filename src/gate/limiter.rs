//! Fixed-window rate limiter keyed by an identifier string.
//!
//! # Algorithm
//!
//! Each identifier owns one window entry `{count, window_start}`:
//!
//! 1. If the entry is missing, or `now - window_start >= window`, it is reset
//!    to `{count: 0, window_start: now}`.
//! 2. `count` is incremented.
//! 3. The request is allowed while `count <= max_requests`.
//!
//! The window is fixed, not sliding: every identifier's budget refills in full
//! at `window_start + window`, which is also the advertised reset time.
//!
//! # Concurrency
//!
//! Entries live in a [`DashMap`], which shards the key space behind
//! independent `RwLock`s. [`RateLimiter::check`] performs the whole
//! read-reset-increment sequence while holding the entry's shard write guard,
//! so two concurrent requests for the same identifier are serialized and can
//! never both observe `count = max_requests - 1`.
//!
//! # Cleanup
//!
//! Expired entries are purged at most once per window. [`RateLimiter::sweep_due`]
//! lets exactly one caller claim the sweep through a compare-exchange on the
//! next-sweep timestamp; that caller runs [`RateLimiter::purge_expired`] off the
//! request path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// `max_requests` cannot be zero.
    ZeroMaxRequests,
    /// The window must be at least one second long.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroMaxRequests => {
                write!(f, "max requests per window must be greater than 0")
            }
            RateLimitError::ZeroWindow => {
                write!(f, "rate limit window must be at least one second")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

// =============================================================================
// Clock
// =============================================================================

/// Source of wall-clock time for the gate.
///
/// Timestamps are Unix epoch milliseconds. Window arithmetic uses whole
/// seconds derived from them.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn at_secs(secs: u64) -> Self {
        Self {
            millis: AtomicU64::new(secs.saturating_mul(1000)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_secs(&self, secs: u64) {
        self.millis.store(secs.saturating_mul(1000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Limiter
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: u64,
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Configured maximum per window.
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the current window ends.
    pub reset_at: u64,
}

impl RateLimitDecision {
    /// Seconds until the window resets, never less than one.
    pub fn retry_after(&self, now: u64) -> u64 {
        self.reset_at.saturating_sub(now).max(1)
    }
}

/// Process-wide fixed-window counter store.
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<String, WindowEntry>,
    max_requests: u32,
    window_secs: u64,
    next_sweep_at: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window` per identifier.
    ///
    /// Sub-second windows are rejected; the window is truncated to whole
    /// seconds.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::ZeroMaxRequests);
        }
        let window_secs = window.as_secs();
        if window_secs == 0 {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            entries: DashMap::new(),
            max_requests,
            window_secs,
            next_sweep_at: AtomicU64::new(0),
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Count one request for `identifier` at `now` (epoch seconds).
    ///
    /// Never fails. The entry guard is held for the whole
    /// read-reset-increment, which makes the check atomic per identifier.
    pub fn check(&self, identifier: &str, now: u64) -> RateLimitDecision {
        let mut entry = self
            .entries
            .entry(identifier.to_owned())
            .or_insert(WindowEntry {
                count: 0,
                window_start: now,
            });

        if self.is_expired(&entry, now) {
            *entry = WindowEntry {
                count: 0,
                window_start: now,
            };
        }

        entry.count = entry.count.saturating_add(1);

        RateLimitDecision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_at: entry.window_start.saturating_add(self.window_secs),
        }
    }

    /// Claim the next sweep if one is due.
    ///
    /// Returns `true` for exactly one caller per window; that caller is
    /// expected to run [`purge_expired`](Self::purge_expired).
    pub fn sweep_due(&self, now: u64) -> bool {
        let due_at = self.next_sweep_at.load(Ordering::Acquire);
        if now < due_at {
            return false;
        }
        self.next_sweep_at
            .compare_exchange(
                due_at,
                now.saturating_add(self.window_secs),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Remove every entry whose window has ended. Returns how many were removed.
    pub fn purge_expired(&self, now: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !self.is_expired(entry, now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of tracked identifiers, including not-yet-purged stale ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    fn is_expired(&self, entry: &WindowEntry, now: u64) -> bool {
        now.saturating_sub(entry.window_start) >= self.window_secs
    }
}
