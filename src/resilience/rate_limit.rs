use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use tokio::time::Instant;

use crate::resilience::timer::TimerHandle;

const METRIC_RATE_LIMIT_DENIED: &str = "revalidator_rate_limit_denied_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: NonZeroU32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_reset: Instant,
    first_request: Instant,
}

/// Outcome of a single [`FixedWindowRateLimiter::check_limit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: Instant,
    pub total_hits: u32,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let wait = self.reset_at.saturating_duration_since(Instant::now());
        wait.as_secs_f64().ceil().max(1.0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitStats {
    pub total_keys: usize,
    pub active_keys: usize,
    pub expired_keys: usize,
}

/// Per-key fixed-window counter.
///
/// A key's count resets to zero when a request arrives at or after the
/// window reset time; the reset time moves to `now + window` at the same moment.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    name: &'static str,
    config: RateLimitConfig,
    entries: DashMap<String, RateLimitEntry>,
}

impl FixedWindowRateLimiter {
    pub fn new(name: &'static str, config: RateLimitConfig) -> Self {
        Self {
            name,
            config,
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit(&self) -> u32 {
        self.config.max_requests.get()
    }

    /// Count a request for `key` and decide whether it may proceed.
    pub fn check_limit(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let window = self.config.window;
        let max = self.limit();

        // the entry guard holds the shard lock, so reset and increment are atomic
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                window_reset: now + window,
                first_request: now,
            });
        if now >= entry.window_reset {
            entry.count = 0;
            entry.window_reset = now + window;
            entry.first_request = now;
        }
        let allowed = entry.count < max;
        if allowed {
            entry.count += 1;
        }

        let decision = RateLimitDecision {
            allowed,
            remaining: max.saturating_sub(entry.count),
            reset_at: entry.window_reset,
            total_hits: entry.count,
        };
        drop(entry);

        if !decision.allowed {
            counter!(METRIC_RATE_LIMIT_DENIED, "limiter" => self.name).increment(1);
        }
        decision
    }

    /// Whether `key` is still within budget, without counting a hit.
    pub fn peek(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let max = self.limit();
        match self.entries.get(key) {
            Some(entry) if now < entry.window_reset => RateLimitDecision {
                allowed: entry.count < max,
                remaining: max.saturating_sub(entry.count),
                reset_at: entry.window_reset,
                total_hits: entry.count,
            },
            _ => RateLimitDecision {
                allowed: true,
                remaining: max,
                reset_at: now + self.config.window,
                total_hits: 0,
            },
        }
    }

    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn reset_all(&self) {
        self.entries.clear();
    }

    /// Drop entries whose window has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.window_reset);
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let mut stats = RateLimitStats::default();
        for entry in self.entries.iter() {
            stats.total_keys += 1;
            if now < entry.window_reset {
                stats.active_keys += 1;
            } else {
                stats.expired_keys += 1;
            }
        }
        stats
    }

    /// Periodically remove expired entries until the handle is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> TimerHandle {
        let limiter = Arc::clone(self);
        TimerHandle::every(every, move || {
            let limiter = Arc::clone(&limiter);
            async move {
                let removed = limiter.sweep_expired();
                if removed > 0 {
                    tracing::debug!(
                        target: "revalidator::resilience::rate_limit",
                        limiter = limiter.name,
                        removed,
                        "Swept expired rate-limit entries"
                    );
                }
            }
        })
    }
}
