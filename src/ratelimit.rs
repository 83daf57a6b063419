//! Sliding-window rate limiter over the shared store.
//!
//! Each limiter key keeps one counter per fixed window. Admission looks at the
//! current window plus the share of the previous window that still overlaps
//! the trailing `window`, which approximates a true sliding window with two
//! counters.
//!
//! The read and the increment are separate store commands, so concurrent
//! callers can overshoot the limit slightly.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::store::{keys, Store, StoreResult};

/// Limiter key for calls to the music generation API.
pub const MUSIC_API: &str = "music-api";

/// Separate key used only by the statistics endpoint, so that reporting
/// never eats into the worker's budget.
pub const MUSIC_API_STATS: &str = "music-api:stats";

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, max_requests: u32, window: Duration) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), max_requests, window)
    }

    pub fn with_clock(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        max_requests: u32,
        window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            max_requests,
            // Zero-length windows would divide by zero below.
            window: window.max(Duration::from_millis(1)),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Tries to take one slot for `key`.
    ///
    /// A denied admission consumes nothing; the caller should not retry
    /// before `reset_at`.
    #[tracing::instrument(skip(self))]
    pub async fn try_acquire(&self, key: &str) -> StoreResult<Admission> {
        let window_ms = self.window_millis();
        let now_ms = self.clock.now().timestamp_millis();

        let current_window = now_ms.div_euclid(window_ms);
        let elapsed = now_ms.rem_euclid(window_ms);

        let current_key = keys::rate_limit(key, current_window);
        let previous_key = keys::rate_limit(key, current_window - 1);

        let current = self.store.counter(&current_key).await?;
        let previous = self.store.counter(&previous_key).await?;

        let weight = (window_ms - elapsed) as f64 / window_ms as f64;
        let carried = (previous as f64 * weight).floor() as i64;

        let reset_at = Utc
            .timestamp_millis_opt((current_window + 1).saturating_mul(window_ms))
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let limit = i64::from(self.max_requests);

        if carried + current >= limit {
            tracing::debug!(key, current, carried, "rate limit reached");
            return Ok(Admission {
                allowed: false,
                remaining: 0,
                reset_at,
            });
        }

        // Counters must outlive the window that follows them, where they
        // still contribute as the weighted previous window.
        let ttl = self.window * 2 + Duration::from_secs(1);
        let count = self.store.incr_ex(&current_key, ttl).await?;

        let remaining = (limit - (carried + count)).max(0);

        Ok(Admission {
            allowed: true,
            remaining: u32::try_from(remaining).unwrap_or(0),
            reset_at,
        })
    }
}
