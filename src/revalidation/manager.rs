//! Batch invalidation with retries, debouncing and a priority queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use serde_json::json;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::application::logger::{LogSource, Logger};
use crate::application::ports::CacheInvalidator;
use crate::domain::notification::ChangeNotification;
use crate::domain::routes::{PathSet, derive_paths};
use crate::resilience::lock::mutex_lock;
use crate::resilience::{CircuitBreaker, CircuitError, RetryManager, RetryPolicy, TimerHandle};
use crate::revalidation::queue::{Priority, QueueStatus, RevalidationTask, TaskQueue};

const SOURCE: &str = "revalidation::manager";
const METRIC_INVALIDATIONS: &str = "revalidator_invalidations_total";

#[derive(Debug, Clone, PartialEq)]
pub struct RevalidationConfig {
    /// Retry policy around each single-path invalidation.
    pub path_retry: RetryPolicy,
    /// Total batch attempts made by [`RevalidationManager::revalidate_with_retry`]
    /// on behalf of scheduled and queued work.
    pub batch_attempts: u32,
    /// Batch attempt `n` waits `batch_delay * n` before the next one.
    pub batch_delay: Duration,
    pub debounce: Duration,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            path_retry: RetryPolicy::default(),
            batch_attempts: 3,
            batch_delay: Duration::from_millis(1000),
            debounce: Duration::from_millis(1000),
        }
    }
}

/// Per-path outcome of one batch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    /// `"<path>: <error>"` for each failed path.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevalidationResult {
    /// True only when every requested path was invalidated.
    pub success: bool,
    pub paths: Vec<String>,
    pub errors: Vec<String>,
    pub timestamp: OffsetDateTime,
}

#[derive(Debug)]
struct PendingDebounce {
    generation: u64,
    timer: TimerHandle,
}

pub struct RevalidationManager {
    invalidator: Arc<dyn CacheInvalidator>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryManager,
    logger: Logger,
    config: RevalidationConfig,
    pending: Mutex<HashMap<String, PendingDebounce>>,
    generation: AtomicU64,
    queue: Mutex<TaskQueue>,
    processing: AtomicBool,
}

impl RevalidationManager {
    pub fn new(
        invalidator: Arc<dyn CacheInvalidator>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryManager,
        logger: Logger,
        config: RevalidationConfig,
    ) -> Self {
        Self {
            invalidator,
            breaker,
            retry,
            logger,
            config,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            queue: Mutex::new(TaskQueue::default()),
            processing: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RevalidationConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Pages made stale by `notification`; `None` when its kind has no routes.
    pub fn paths_for(&self, notification: &ChangeNotification) -> Option<PathSet> {
        derive_paths(notification)
    }

    /// Invalidate each path once, in order, through the breaker and retry policy.
    ///
    /// A failed path never stops its siblings.
    pub async fn execute_batch_revalidation(&self, paths: &[String]) -> BatchOutcome {
        self.logger.revalidation_started(paths);
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();

        for path in paths {
            let operation_name = format!("invalidate {path}");
            let result = self
                .breaker
                .execute(
                    || {
                        self.retry.execute_with_retry(
                            || self.invalidator.invalidate(path),
                            &self.config.path_retry,
                            &operation_name,
                        )
                    },
                    &operation_name,
                )
                .await;

            match result {
                Ok(()) => {
                    counter!(METRIC_INVALIDATIONS, "outcome" => "success").increment(1);
                    outcome.succeeded.push(path.clone());
                }
                Err(err) => {
                    let circuit_open = matches!(err, CircuitError::Open { .. });
                    let label = if circuit_open { "circuit_open" } else { "failure" };
                    counter!(METRIC_INVALIDATIONS, "outcome" => label).increment(1);
                    let message = err.to_string();
                    self.logger.revalidation_error(path, &message, circuit_open);
                    outcome.errors.push(format!("{path}: {message}"));
                }
            }
        }

        self.logger
            .revalidation_completed(&outcome.succeeded, &outcome.errors);
        self.logger.performance(
            "revalidation_batch",
            started.elapsed(),
            Some(json!({ "paths": paths.len(), "failed": outcome.errors.len() })),
        );
        outcome
    }

    /// Run the whole batch until one attempt invalidates every path or
    /// `max_attempts` batches ran.
    ///
    /// Between attempt `n` and `n + 1` the manager waits `delay * n`.
    pub async fn revalidate_with_retry(
        &self,
        paths: &[String],
        max_attempts: u32,
        delay: Duration,
    ) -> RevalidationResult {
        let attempts = max_attempts.max(1);
        let requested: PathSet = paths.iter().cloned().collect();
        let batch = requested.as_slice();
        let mut last = BatchOutcome::default();

        for attempt in 1..=attempts {
            last = self.execute_batch_revalidation(batch).await;
            if last.errors.is_empty() {
                break;
            }

            if attempt < attempts {
                let wait = delay * attempt;
                self.logger.warn(
                    LogSource::Revalidation,
                    "Batch incomplete, retrying whole batch",
                    Some(json!({
                        "attempt": attempt,
                        "maxAttempts": attempts,
                        "failed": last.errors.len(),
                        "delayMs": u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    })),
                );
                tokio::time::sleep(wait).await;
            }
        }

        RevalidationResult {
            success: last.errors.is_empty(),
            paths: last.succeeded,
            errors: last.errors,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Revalidate `paths` after `delay`, replacing any pending run for the same path set.
    pub fn schedule_revalidation(self: &Arc<Self>, paths: PathSet, delay: Duration) {
        let key = paths.debounce_key();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let manager = Arc::clone(self);
        let task_key = key.clone();
        let paths = paths.into_vec();

        // hold the map lock until the entry is in place so the timer cannot miss it
        let mut pending = mutex_lock(&self.pending, SOURCE, "schedule");
        let timer = TimerHandle::after(delay, async move {
            if !manager.claim_pending(&task_key, generation) {
                return;
            }
            let config = manager.config();
            manager
                .revalidate_with_retry(&paths, config.batch_attempts, config.batch_delay)
                .await;
        });
        let replaced = pending.insert(key.clone(), PendingDebounce { generation, timer });
        drop(pending);

        if let Some(previous) = replaced {
            previous.timer.cancel();
            self.logger.debug(
                LogSource::Revalidation,
                "Debounced revalidation replaced",
                Some(json!({ "key": key })),
            );
        }
    }

    fn claim_pending(&self, key: &str, generation: u64) -> bool {
        let mut pending = mutex_lock(&self.pending, SOURCE, "claim");
        match pending.get(key) {
            Some(entry) if entry.generation == generation => {
                pending.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn pending_debounces(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "pending_debounces").len()
    }

    /// Enqueue paths and make sure a drain is running.
    pub fn add_to_queue(
        self: &Arc<Self>,
        paths: PathSet,
        priority: Priority,
        debounce: Duration,
    ) -> Uuid {
        let id = mutex_lock(&self.queue, SOURCE, "enqueue").push(paths, priority, debounce);
        self.logger.debug(
            LogSource::Revalidation,
            "Revalidation task queued",
            Some(json!({ "taskId": id.to_string(), "priority": priority.as_str() })),
        );
        self.spawn_drain();
        id
    }

    fn spawn_drain(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.process_queue().await;
        });
    }

    fn next_task(&self, watermark: u64) -> Option<RevalidationTask> {
        mutex_lock(&self.queue, SOURCE, "pop").pop_before(watermark)
    }

    /// Drain tasks queued before this call. Returns how many were handled.
    ///
    /// Returns 0 immediately if another drain is active; tasks that arrive
    /// mid-drain are left for a follow-up drain.
    pub async fn process_queue(self: &Arc<Self>) -> usize {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }

        let watermark = mutex_lock(&self.queue, SOURCE, "watermark").watermark();
        let mut handled = 0;
        while let Some(task) = self.next_task(watermark) {
            if task.debounce.is_zero() {
                self.revalidate_with_retry(
                    task.paths.as_slice(),
                    self.config.batch_attempts,
                    self.config.batch_delay,
                )
                .await;
            } else {
                self.schedule_revalidation(task.paths, task.debounce);
            }
            handled += 1;
        }

        self.processing.store(false, Ordering::Release);
        if mutex_lock(&self.queue, SOURCE, "follow_up").len() > 0 {
            self.spawn_drain();
        }
        handled
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            pending: mutex_lock(&self.queue, SOURCE, "status").len(),
            processing: self.processing.load(Ordering::Acquire),
        }
    }

    /// Drop queued tasks and cancel debounced runs that have not started.
    pub fn clear_queue(&self) -> usize {
        let dropped = mutex_lock(&self.queue, SOURCE, "clear").clear();
        let timers: Vec<PendingDebounce> = mutex_lock(&self.pending, SOURCE, "clear")
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &timers {
            entry.timer.cancel();
        }
        self.logger.info(
            LogSource::Revalidation,
            "Revalidation queue cleared",
            Some(json!({ "tasks": dropped, "debounces": timers.len() })),
        );
        dropped + timers.len()
    }
}
