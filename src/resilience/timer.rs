//! Cancelable timers backed by tokio tasks.
//!
//! Debounced revalidation and the rate-limit sweep both need "run this
//! later unless told otherwise". A [`TimerHandle`] owns the spawned task so
//! the caller can cancel work that has not started yet.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a delayed or periodic task.
///
/// Dropping the handle detaches the task; call [`TimerHandle::cancel`] to stop it.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Run `work` once after `delay` has elapsed.
    pub fn after<F>(delay: Duration, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        });
        Self { task }
    }

    /// Run `tick` every `period`, starting one period from now.
    ///
    /// `period` must be non-zero.
    pub fn every<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { task }
    }

    /// Stop the task. Work already past its last await point still completes.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
