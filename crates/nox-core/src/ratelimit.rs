//! # Sliding-Window Rate Limiting
//!
//! Each client key keeps a log of admitted request instants. On every request
//! the log is pruned to the trailing window; the request is admitted when
//! fewer than `max_requests` remain and its instant is appended.
//!
//! The log lives behind [`RateLimitStore`]. [`MemoryRateLimitStore`] keeps it
//! in process, which is only correct for a single replica; a shared store
//! (Redis sorted sets, a Postgres table) plugs in without touching the
//! limiter or the middleware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

/// Longest accepted window: one year.
pub const MAX_WINDOW_SECS: u64 = 365 * 86_400;

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admitted requests per window.
    pub max_requests: usize,
    /// Window length in seconds. Values above [`MAX_WINDOW_SECS`] are clamped.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    fn window(&self) -> Duration {
        let secs = i64::try_from(self.window_secs.min(MAX_WINDOW_SECS)).unwrap_or(0);
        Duration::try_seconds(secs).unwrap_or_else(|| Duration::days(365))
    }
}

/// Window state after one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether this request was admitted and logged.
    pub admitted: bool,
    /// Admitted requests inside the window, this one included.
    pub in_window: usize,
    /// Oldest admitted instant still inside the window.
    pub oldest: Option<DateTime<Utc>>,
}

/// Storage for per-key request logs.
///
/// `admit` must prune, compare and append atomically per key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Try to admit one request for `key` at `now`.
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max_requests: usize,
    ) -> Result<WindowState, StoreError>;

    /// Drop logs with no instant inside the window. Returns how many keys were removed.
    async fn evict_idle(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, StoreError>;
}

/// In-process request logs.
#[derive(Debug, Default, Clone)]
pub struct MemoryRateLimitStore {
    logs: Arc<Mutex<HashMap<String, Vec<DateTime<Utc>>>>>,
}

impl MemoryRateLimitStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.logs.lock().len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max_requests: usize,
    ) -> Result<WindowState, StoreError> {
        let cutoff = window_start(now, window);
        let mut logs = self.logs.lock();
        let log = logs.entry(key.to_string()).or_default();
        log.retain(|t| *t > cutoff);

        let admitted = log.len() < max_requests;
        if admitted {
            log.push(now);
        }
        Ok(WindowState {
            admitted,
            in_window: log.len(),
            oldest: log.first().copied(),
        })
    }

    async fn evict_idle(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, StoreError> {
        let cutoff = window_start(now, window);
        let mut logs = self.logs.lock();
        let before = logs.len();
        logs.retain(|_, log| log.last().is_some_and(|t| *t > cutoff));
        Ok(before - logs.len())
    }
}

/// Earliest instant still inside the window ending at `now`.
fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests still admissible in the current window.
    pub remaining: usize,
    /// Configured maximum per window.
    pub limit: usize,
    /// Seconds until the oldest logged request leaves the window (rejections only).
    pub retry_after_secs: Option<u64>,
}

/// Checks per-key request rates against a [`RateLimitStore`].
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    checks: Arc<AtomicU64>,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Idle logs are swept once per this many checks.
const EVICT_EVERY: u64 = 1024;

impl SlidingWindowLimiter {
    /// Limiter over an in-process store.
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(config, Arc::new(MemoryRateLimitStore::new()), Arc::new(SystemClock))
    }

    /// Limiter over an arbitrary store and clock.
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Account one request for `key`.
    ///
    /// # Errors
    ///
    /// Propagates store failures. Whether to fail open or closed is the
    /// caller's decision.
    pub async fn check(&self, key: &str) -> Result<RateDecision, StoreError> {
        let now = self.clock.now();
        let window = self.config.window();

        if self.checks.fetch_add(1, Ordering::Relaxed) % EVICT_EVERY == EVICT_EVERY - 1 {
            let evicted = self.store.evict_idle(now, window).await?;
            if evicted > 0 {
                tracing::debug!(evicted, "evicted idle rate limit logs");
            }
        }

        let state = self
            .store
            .admit(key, now, window, self.config.max_requests)
            .await?;

        let retry_after_secs = if state.admitted {
            None
        } else {
            let secs = state
                .oldest
                .and_then(|oldest| oldest.checked_add_signed(window))
                .map(|frees_at| (frees_at - now).num_seconds().max(1))
                .unwrap_or(1);
            Some(u64::try_from(secs).unwrap_or(1))
        };

        Ok(RateDecision {
            allowed: state.admitted,
            remaining: self.config.max_requests.saturating_sub(state.in_window),
            limit: self.config.max_requests,
            retry_after_secs,
        })
    }
}
