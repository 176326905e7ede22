//! Periodic backstop for missed webhooks.
//!
//! Polls the content store's latest modification time. When it moves
//! forward, the documents changed since the previous reading are mapped to
//! page paths and queued at low priority.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use crate::application::health::ServiceMetrics;
use crate::application::logger::{LogSource, Logger};
use crate::application::ports::{ContentStore, ContentStoreError};
use crate::domain::routes::{PathSet, derive_paths};
use crate::resilience::TimerHandle;
use crate::resilience::lock::mutex_lock;
use crate::revalidation::{Priority, RevalidationManager};
use crate::webhook::validate_webhook_payload;

const SOURCE: &str = "application::watcher";

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// First reading; nothing to compare against yet.
    Baseline,
    Unchanged,
    Queued { documents: usize, paths: usize },
}

pub struct ContentWatcher {
    store: Arc<dyn ContentStore>,
    manager: Arc<RevalidationManager>,
    metrics: Arc<ServiceMetrics>,
    logger: Logger,
    debounce: Duration,
    last_seen: Mutex<Option<OffsetDateTime>>,
    primed: Mutex<bool>,
}

impl ContentWatcher {
    pub fn new(
        store: Arc<dyn ContentStore>,
        manager: Arc<RevalidationManager>,
        metrics: Arc<ServiceMetrics>,
        logger: Logger,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            manager,
            metrics,
            logger,
            debounce,
            last_seen: Mutex::new(None),
            primed: Mutex::new(false),
        }
    }

    pub async fn poll_once(&self) -> Result<PollOutcome, ContentStoreError> {
        let latest = self.store.latest_modification().await?;
        if let Some(at) = latest {
            self.metrics.observe_content_update(at);
        }

        let previous = {
            let mut primed = mutex_lock(&self.primed, SOURCE, "primed");
            let mut last_seen = mutex_lock(&self.last_seen, SOURCE, "last_seen");
            if !*primed {
                *primed = true;
                *last_seen = latest;
                return Ok(PollOutcome::Baseline);
            }
            let advanced = match (*last_seen, latest) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(seen), Some(now)) => now > seen,
            };
            if !advanced {
                return Ok(PollOutcome::Unchanged);
            }
            *last_seen
        };

        let documents = match previous {
            Some(since) => self.store.changed_since(since).await?,
            // content appeared in an empty store; everything is new
            None => self.store.changed_since(OffsetDateTime::UNIX_EPOCH).await?,
        };

        let mut paths = PathSet::new();
        for document in &documents {
            match notification_value(document)
                .and_then(|value| validate_webhook_payload(&value).ok())
            {
                Some(notification) => {
                    if let Some(derived) = derive_paths(&notification) {
                        paths.extend(derived);
                    }
                }
                None => self.logger.debug(
                    LogSource::Revalidation,
                    "Watcher skipped unrecognised document",
                    Some(json!({ "id": document.get("_id") })),
                ),
            }
        }

        // only advance once the changed documents were read
        *mutex_lock(&self.last_seen, SOURCE, "advance") = latest;

        let path_count = paths.len();
        if !paths.is_empty() {
            let task = self
                .manager
                .add_to_queue(paths, Priority::Low, self.debounce);
            self.logger.info(
                LogSource::Revalidation,
                "Watcher queued revalidation for changed content",
                Some(json!({
                    "taskId": task.to_string(),
                    "documents": documents.len(),
                    "paths": path_count,
                })),
            );
        }

        Ok(PollOutcome::Queued {
            documents: documents.len(),
            paths: path_count,
        })
    }

    /// Poll every `period` until the handle is cancelled.
    pub fn spawn(self: Arc<Self>, period: Duration) -> TimerHandle {
        TimerHandle::every(period, move || {
            let watcher = Arc::clone(&self);
            async move {
                if let Err(err) = watcher.poll_once().await {
                    watcher.logger.warn(
                        LogSource::Revalidation,
                        "Content watcher poll failed",
                        Some(json!({ "error": err.to_string() })),
                    );
                }
            }
        })
    }
}

/// Map a stored document onto the notification shape the validator accepts.
fn notification_value(document: &Value) -> Option<Value> {
    let object = document.as_object()?;
    let mut notification = Map::new();
    notification.insert("documentType".into(), object.get("_type")?.clone());
    notification.insert("documentId".into(), object.get("_id")?.clone());
    if let Some(revision) = object.get("_rev") {
        notification.insert("revision".into(), revision.clone());
    }
    if let Some(slug) = object.get("slug").filter(|slug| slug.is_object()) {
        notification.insert("slug".into(), slug.clone());
    }
    if let Some(category) = object.get("category").filter(|c| c.is_string()) {
        notification.insert("category".into(), category.clone());
    }
    notification.insert("operation".into(), Value::String("update".into()));
    Some(Value::Object(notification))
}
