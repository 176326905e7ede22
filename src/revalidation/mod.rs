//! Revalidation manager and its task queue.

pub mod manager;
pub mod queue;

pub use manager::{BatchOutcome, RevalidationConfig, RevalidationManager, RevalidationResult};
pub use queue::{Priority, QueueStatus, RevalidationTask};
