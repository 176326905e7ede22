//! Resilience primitives shared by the webhook and revalidation paths.
//!
//! - [`RetryManager`]: exponential backoff with optional jitter
//! - [`CircuitBreaker`]: CLOSED / OPEN / HALF_OPEN failure gate
//! - [`FixedWindowRateLimiter`]: per-key fixed-window request counter
//! - [`TimerHandle`]: cancelable delayed and periodic tasks

pub mod circuit_breaker;
pub(crate) mod lock;
pub mod rate_limit;
pub mod retry;
pub mod timer;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitSnapshot, CircuitState,
};
pub use rate_limit::{FixedWindowRateLimiter, RateLimitConfig, RateLimitDecision, RateLimitStats};
pub use retry::{RetryManager, RetryPolicy, RetryPolicyError};
pub use timer::TimerHandle;
