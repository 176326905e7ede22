//! Exponential backoff with optional jitter.

use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use thiserror::Error;

use crate::application::logger::{LogSource, Logger};
use crate::resilience::lock::mutex_lock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryPolicyError {
    #[error("base delay must be greater than zero")]
    ZeroBaseDelay,
    #[error("max delay ({max_ms} ms) must be at least the base delay ({base_ms} ms)")]
    MaxBelowBase { base_ms: u128, max_ms: u128 },
    #[error("backoff multiplier must be finite and greater than 1, got {0}")]
    InvalidMultiplier(String),
}

/// Immutable retry parameters. Construct with [`RetryPolicy::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        jitter: bool,
    ) -> Result<Self, RetryPolicyError> {
        if base_delay.is_zero() {
            return Err(RetryPolicyError::ZeroBaseDelay);
        }
        if max_delay < base_delay {
            return Err(RetryPolicyError::MaxBelowBase {
                base_ms: base_delay.as_millis(),
                max_ms: max_delay.as_millis(),
            });
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier <= 1.0 {
            return Err(RetryPolicyError::InvalidMultiplier(
                backoff_multiplier.to_string(),
            ));
        }

        Ok(Self {
            max_retries,
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Same policy with jitter switched on or off.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay before retry number `attempt + 1` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let delay_ms = (base_ms * self.backoff_multiplier.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryManager {
    logger: Logger,
    source: LogSource,
    rng: Mutex<StdRng>,
}

impl RetryManager {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            source: LogSource::Revalidation,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic jitter for reproducible runs.
    pub fn with_seed(logger: Logger, seed: u64) -> Self {
        Self {
            logger,
            source: LogSource::Revalidation,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_log_source(mut self, source: LogSource) -> Self {
        self.source = source;
        self
    }

    /// Delay to sleep before retry `attempt + 1`, jitter applied.
    pub fn next_delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let delay = policy.delay_for(attempt);
        if !policy.jitter() {
            return delay;
        }
        let factor: f64 = mutex_lock(&self.rng, "resilience::retry", "jitter").gen_range(0.5..=1.0);
        Duration::from_millis((delay.as_secs_f64() * 1000.0 * factor).round() as u64)
    }

    /// Run `operation` until it succeeds or `policy.max_retries()` retries are spent.
    ///
    /// The last error is returned unchanged.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
        operation_name: &str,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.logger.info(
                            self.source,
                            &format!("{operation_name} succeeded after {attempt} retries"),
                            Some(json!({ "operation": operation_name, "retries": attempt })),
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= policy.max_retries() {
                        self.logger.error(
                            self.source,
                            &format!(
                                "{operation_name} failed after {} attempts",
                                attempt + 1
                            ),
                            Some(json!({
                                "operation": operation_name,
                                "attempts": attempt + 1,
                                "error": err.to_string(),
                            })),
                        );
                        return Err(err);
                    }

                    let delay = self.next_delay(policy, attempt);
                    self.logger.warn(
                        self.source,
                        &format!("{operation_name} failed, retrying"),
                        Some(json!({
                            "operation": operation_name,
                            "attempt": attempt + 1,
                            "maxRetries": policy.max_retries(),
                            "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "error": err.to_string(),
                        })),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::application::logger::{LogLevel, MemorySink};

    fn manager() -> (RetryManager, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let logger = Logger::new(LogLevel::Debug, sink.clone());
        (RetryManager::with_seed(logger, 7), sink)
    }

    fn policy(max_retries: u32, jitter: bool) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2.0,
            jitter,
        )
        .expect("valid policy")
    }

    #[test]
    fn rejects_invalid_policies() {
        let zero = RetryPolicy::new(1, Duration::ZERO, Duration::from_secs(1), 2.0, false);
        assert_eq!(zero, Err(RetryPolicyError::ZeroBaseDelay));

        let inverted = RetryPolicy::new(
            1,
            Duration::from_secs(2),
            Duration::from_secs(1),
            2.0,
            false,
        );
        assert!(matches!(inverted, Err(RetryPolicyError::MaxBelowBase { .. })));

        let flat = RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(1), 1.0, false);
        assert!(matches!(flat, Err(RetryPolicyError::InvalidMultiplier(_))));
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = policy(10, false);
        let delays: Vec<u128> = (0..6).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let (manager, _) = manager();
        let policy = policy(10, true);
        for attempt in 0..5 {
            let nominal = policy.delay_for(attempt);
            let jittered = manager.next_delay(&policy, attempt);
            assert!(jittered <= nominal, "{jittered:?} > {nominal:?}");
            assert!(jittered * 2 >= nominal, "{jittered:?} < half of {nominal:?}");
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let (first, _) = manager();
        let (second, _) = manager();
        let policy = policy(10, true);
        let a: Vec<_> = (0..5).map(|n| first.next_delay(&policy, n)).collect();
        let b: Vec<_> = (0..5).map(|n| second.next_delay(&policy, n)).collect();
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_exact_backoff_between_attempts_without_jitter() {
        let (manager, _) = manager();
        let policy = policy(3, false);
        let started = Instant::now();
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result: Result<(), String> = manager
            .execute_with_retry(
                || {
                    let stamps = Arc::clone(&stamps);
                    async move {
                        stamps.lock().expect("stamps").push(started.elapsed());
                        Err("down".to_string())
                    }
                },
                &policy,
                "invalidate",
            )
            .await;

        assert_eq!(result, Err("down".to_string()));
        let stamps = stamps.lock().expect("stamps").clone();
        assert_eq!(stamps.len(), 4);
        for n in 1..stamps.len() {
            let gap = stamps[n] - stamps[n - 1];
            let expected = policy.delay_for(n as u32 - 1);
            assert!(
                gap >= expected && gap <= expected + Duration::from_millis(2),
                "gap before attempt {n} was {gap:?}, expected {expected:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn logs_info_when_success_needed_retries() {
        let (manager, sink) = manager();
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = manager
            .execute_with_retry(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if call == 0 {
                            Err("flaky".to_string())
                        } else {
                            Ok(call)
                        }
                    }
                },
                &policy(2, false),
                "invalidate /gallery",
            )
            .await;

        assert_eq!(result, Ok(1));
        assert!(sink.contains(LogLevel::Warn, LogSource::Revalidation, "retrying"));
        assert!(sink.contains(
            LogLevel::Info,
            LogSource::Revalidation,
            "succeeded after 1 retries"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_fails_immediately_with_error_log() {
        let (manager, sink) = manager();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = manager
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("nope".to_string()) }
                },
                &policy(0, false),
                "invalidate",
            )
            .await;

        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sink.contains(LogLevel::Error, LogSource::Revalidation, "after 1 attempts"));
    }
}
