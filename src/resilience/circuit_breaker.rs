//! Failure-count gate around a fallible async operation.
//!
//! - CLOSED: calls run; `failure_threshold` consecutive failures open the circuit
//! - OPEN: calls are rejected without running until `reset_timeout` has passed
//!   since the last failure, then the next call runs as a HALF_OPEN trial
//! - HALF_OPEN: a single trial call runs and others are rejected until it
//!   settles; a success closes the circuit, a failure reopens it

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;

use crate::application::logger::{LogSource, Logger};
use crate::resilience::lock::mutex_lock;

const METRIC_BREAKER_REJECTIONS: &str = "revalidator_breaker_rejections_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    /// Reported only; does not affect transitions.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(10),
        }
    }
}

/// Point-in-time copy of a breaker's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub last_failure: Option<Instant>,
}

#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error("circuit `{breaker}` is open, retry in {retry_in_ms} ms")]
    Open {
        breaker: &'static str,
        retry_in_ms: u64,
    },
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitError::Operation(err) => Some(err),
            CircuitError::Open { .. } => None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// Releases the HALF_OPEN trial slot even when the trial future is dropped.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            mutex_lock(&self.breaker.inner, "resilience::circuit_breaker", "trial")
                .trial_in_flight = false;
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    logger: Logger,
    source: LogSource,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig, logger: Logger) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner::closed()),
            logger,
            source: LogSource::Revalidation,
        }
    }

    pub fn with_log_source(mut self, source: LogSource) -> Self {
        self.source = source;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` if the circuit admits it.
    ///
    /// The lock is released before `operation` is awaited.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let trial = match self.try_acquire(Instant::now()) {
            Ok(trial) => trial,
            Err(retry_in) => {
                counter!(METRIC_BREAKER_REJECTIONS, "breaker" => self.name).increment(1);
                let retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX);
                self.logger.warn(
                    self.source,
                    &format!("Circuit {} open, rejecting {operation_name}", self.name),
                    Some(json!({ "breaker": self.name, "retryInMs": retry_in_ms })),
                );
                return Err(CircuitError::Open {
                    breaker: self.name,
                    retry_in_ms,
                });
            }
        };
        let _trial = TrialGuard {
            breaker: self,
            armed: trial,
        };

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure(Instant::now(), &err.to_string());
                Err(CircuitError::Operation(err))
            }
        }
    }

    pub fn state(&self) -> CircuitSnapshot {
        let inner = mutex_lock(&self.inner, "resilience::circuit_breaker", "state");
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure: inner.last_failure,
        }
    }

    /// Force CLOSED with zeroed counters.
    pub fn reset(&self) {
        *mutex_lock(&self.inner, "resilience::circuit_breaker", "reset") = Inner::closed();
        self.logger.info(
            self.source,
            &format!("Circuit {} reset", self.name),
            Some(json!({ "breaker": self.name })),
        );
    }

    /// Admit or reject a call at `now`.
    ///
    /// `Ok(true)` means the call holds the HALF_OPEN trial slot. On rejection
    /// returns the remaining wait.
    pub(crate) fn try_acquire(&self, now: Instant) -> Result<bool, Duration> {
        let mut inner = mutex_lock(&self.inner, "resilience::circuit_breaker", "acquire");
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if inner.trial_in_flight => Err(Duration::ZERO),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(true)
            }
            CircuitState::Open => {
                let since = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.config.reset_timeout);
                if since >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    drop(inner);
                    self.logger.info(
                        self.source,
                        &format!("Circuit {} half-open, allowing trial call", self.name),
                        Some(json!({ "breaker": self.name })),
                    );
                    Ok(true)
                } else {
                    Err(self.config.reset_timeout - since)
                }
            }
        }
    }

    pub(crate) fn record_success(&self) {
        let mut inner = mutex_lock(&self.inner, "resilience::circuit_breaker", "success");
        let was = inner.state;
        inner.failure_count = 0;
        inner.success_count = inner.success_count.saturating_add(1);
        inner.state = CircuitState::Closed;
        inner.trial_in_flight = false;
        drop(inner);

        if was == CircuitState::HalfOpen {
            self.logger.info(
                self.source,
                &format!("Circuit {} closed after successful trial", self.name),
                Some(json!({ "breaker": self.name })),
            );
        }
    }

    pub(crate) fn record_failure(&self, now: Instant, error: &str) {
        let mut inner = mutex_lock(&self.inner, "resilience::circuit_breaker", "failure");
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);
        inner.trial_in_flight = false;

        let opened = match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                true
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                true
            }
            _ => false,
        };
        let failure_count = inner.failure_count;
        drop(inner);

        if opened {
            self.logger.warn(
                self.source,
                &format!("Circuit {} opened", self.name),
                Some(json!({
                    "breaker": self.name,
                    "failureCount": failure_count,
                    "error": error,
                })),
            );
        }
    }
}
