//! Prioritized revalidation queue.
//!
//! Tasks drain in `(priority, enqueued_at)` order, FIFO within a priority.
//! A monotonic sequence number breaks ties between tasks enqueued at the
//! same instant.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::routes::PathSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RevalidationTask {
    pub id: Uuid,
    pub paths: PathSet,
    pub priority: Priority,
    pub debounce: Duration,
    pub enqueued_at: Instant,
    pub(crate) sequence: u64,
}

impl RevalidationTask {
    fn order_key(&self) -> (Priority, Instant, u64) {
        (self.priority, self.enqueued_at, self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: HashMap<Uuid, RevalidationTask>,
    next_sequence: u64,
}

impl TaskQueue {
    pub(crate) fn push(&mut self, paths: PathSet, priority: Priority, debounce: Duration) -> Uuid {
        let id = Uuid::new_v4();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.tasks.insert(
            id,
            RevalidationTask {
                id,
                paths,
                priority,
                debounce,
                enqueued_at: Instant::now(),
                sequence,
            },
        );
        id
    }

    /// Sequence number the next pushed task will get.
    pub(crate) fn watermark(&self) -> u64 {
        self.next_sequence
    }

    /// Remove and return the first task enqueued before `watermark`.
    pub(crate) fn pop_before(&mut self, watermark: u64) -> Option<RevalidationTask> {
        let id = self
            .tasks
            .values()
            .filter(|task| task.sequence < watermark)
            .min_by_key(|task| task.order_key())
            .map(|task| task.id)?;
        self.tasks.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.tasks.len();
        self.tasks.clear();
        removed
    }
}
