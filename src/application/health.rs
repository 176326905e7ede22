//! Aggregated health snapshot over breakers, queue and content store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use revalidator_api_types::{
    BreakerHealth, ContentStoreHealth, HealthMetrics, HealthReport, HealthServices, HealthStatus,
    QueueHealth,
};
use metrics::gauge;
use serde_json::json;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::application::logger::{LogSource, Logger};
use crate::application::ports::ContentStore;
use crate::resilience::lock::mutex_lock;
use crate::resilience::{CircuitBreaker, CircuitSnapshot, CircuitState, FixedWindowRateLimiter};
use crate::revalidation::{QueueStatus, RevalidationManager};

const SOURCE: &str = "application::health";

/// Process-wide counters surfaced in the health snapshot.
#[derive(Debug)]
pub struct ServiceMetrics {
    started: Instant,
    total_requests: AtomicU64,
    last_content_update: Mutex<Option<OffsetDateTime>>,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_requests: AtomicU64::new(0),
            last_content_update: Mutex::new(None),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Keep the newest timestamp seen.
    pub fn observe_content_update(&self, at: OffsetDateTime) {
        let mut last = mutex_lock(&self.last_content_update, SOURCE, "observe");
        if last.is_none_or(|current| at > current) {
            *last = Some(at);
        }
    }

    pub fn last_content_update(&self) -> Option<OffsetDateTime> {
        *mutex_lock(&self.last_content_update, SOURCE, "read")
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Pending tasks above this mark the queue degraded.
    pub queue_degraded: usize,
    /// Pending tasks above this mark the queue unhealthy.
    pub queue_unhealthy: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            queue_degraded: 10,
            queue_unhealthy: 50,
        }
    }
}

pub fn breaker_health(snapshot: &CircuitSnapshot) -> BreakerHealth {
    let status = match snapshot.state {
        CircuitState::Open => HealthStatus::Unhealthy,
        CircuitState::HalfOpen => HealthStatus::Degraded,
        CircuitState::Closed if snapshot.failure_count > 0 => HealthStatus::Degraded,
        CircuitState::Closed => HealthStatus::Healthy,
    };
    BreakerHealth {
        status,
        state: snapshot.state.as_str().to_string(),
        failure_count: snapshot.failure_count,
        success_count: snapshot.success_count,
    }
}

pub fn queue_health(status: QueueStatus, thresholds: HealthThresholds) -> QueueHealth {
    let health = if status.pending > thresholds.queue_unhealthy {
        HealthStatus::Unhealthy
    } else if status.pending > thresholds.queue_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    QueueHealth {
        status: health,
        pending: status.pending,
        processing: status.processing,
    }
}

pub struct HealthReporter {
    webhook_breaker: Arc<CircuitBreaker>,
    manager: Arc<RevalidationManager>,
    content_store: Arc<dyn ContentStore>,
    metrics: Arc<ServiceMetrics>,
    limiters: Vec<Arc<FixedWindowRateLimiter>>,
    thresholds: HealthThresholds,
    logger: Logger,
}

impl HealthReporter {
    pub fn new(
        webhook_breaker: Arc<CircuitBreaker>,
        manager: Arc<RevalidationManager>,
        content_store: Arc<dyn ContentStore>,
        metrics: Arc<ServiceMetrics>,
        thresholds: HealthThresholds,
        logger: Logger,
    ) -> Self {
        Self {
            webhook_breaker,
            manager,
            content_store,
            metrics,
            limiters: Vec::new(),
            thresholds,
            logger,
        }
    }

    /// Limiters cleared by [`HealthReporter::reset`].
    pub fn with_limiters(mut self, limiters: Vec<Arc<FixedWindowRateLimiter>>) -> Self {
        self.limiters = limiters;
        self
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    async fn content_store_health(&self) -> ContentStoreHealth {
        match self.content_store.latest_modification().await {
            Ok(latest) => {
                if let Some(at) = latest {
                    self.metrics.observe_content_update(at);
                }
                ContentStoreHealth {
                    status: HealthStatus::Healthy,
                    error: None,
                }
            }
            Err(err) => {
                self.logger.warn(
                    LogSource::Performance,
                    "Content store health check failed",
                    Some(json!({ "error": err.to_string() })),
                );
                ContentStoreHealth {
                    status: HealthStatus::Unhealthy,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Build a snapshot. Never fails; failed checks become unhealthy services.
    pub async fn report(&self) -> HealthReport {
        let started = Instant::now();
        let webhook_breaker = breaker_health(&self.webhook_breaker.state());
        let revalidation_breaker = breaker_health(&self.manager.breaker().state());
        let queue = queue_health(self.manager.queue_status(), self.thresholds);
        gauge!("revalidator_queue_pending").set(queue.pending as f64);
        let content_store = self.content_store_health().await;

        let status = [
            webhook_breaker.status,
            revalidation_breaker.status,
            content_store.status,
            queue.status,
        ]
        .into_iter()
        .max()
        .unwrap_or(HealthStatus::Healthy);

        self.logger.performance(
            "health_check",
            started.elapsed(),
            Some(json!({ "status": status.as_str() })),
        );

        HealthReport {
            status,
            services: HealthServices {
                webhook_breaker,
                revalidation_breaker,
                content_store,
                queue,
            },
            metrics: HealthMetrics {
                uptime_seconds: self.metrics.uptime_seconds(),
                last_content_update: self.metrics.last_content_update(),
                total_requests: self.metrics.total_requests(),
            },
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Clear counters and rate-limit state and force both breakers CLOSED.
    pub fn reset(&self) {
        self.metrics.reset();
        self.webhook_breaker.reset();
        self.manager.breaker().reset();
        for limiter in &self.limiters {
            limiter.reset_all();
        }
        self.logger.info(
            LogSource::Webhook,
            "Health metrics reset",
            Some(json!({ "limiters": self.limiters.len() })),
        );
    }
}
