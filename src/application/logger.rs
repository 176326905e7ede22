//! Structured event log for webhook, revalidation, security and performance events.
//!
//! Every entry carries a level, a source subsystem, a message, an optional
//! JSON context object and an RFC 3339 timestamp. Entries below the
//! configured floor are dropped before they reach the sink.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::histogram;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, info, warn};

use crate::resilience::lock::mutex_lock;

const METRIC_OPERATION_MS: &str = "revalidator_operation_ms";

/// `tracing` target carrying every [`TracingSink`] entry.
pub const EVENT_TARGET: &str = "revalidator::events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSource {
    Webhook,
    Revalidation,
    Security,
    Performance,
}

impl LogSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::Webhook => "webhook",
            LogSource::Revalidation => "revalidation",
            LogSource::Security => "security",
            LogSource::Performance => "performance",
        }
    }
}

/// Kinds of security-relevant events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    InvalidSignature,
    RateLimitExceeded,
    SuspiciousUserAgent,
    MethodNotAllowed,
    UnauthorizedAdminAction,
}

impl SecurityEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEvent::InvalidSignature => "invalid_signature",
            SecurityEvent::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEvent::SuspiciousUserAgent => "suspicious_user_agent",
            SecurityEvent::MethodNotAllowed => "method_not_allowed",
            SecurityEvent::UnauthorizedAdminAction => "unauthorized_admin_action",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
    pub context: Option<Value>,
    pub timestamp: OffsetDateTime,
}

impl LogEntry {
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.timestamp.unix_timestamp().to_string())
    }
}

/// Destination for log entries.
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: &LogEntry);
}

/// Forwards entries to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, entry: &LogEntry) {
        let source = entry.source.as_str();
        let timestamp = entry.timestamp_rfc3339();
        let context = entry
            .context
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        let message = entry.message.as_str();

        match entry.level {
            LogLevel::Debug => debug!(
                target: "revalidator::events",
                source, timestamp = %timestamp, context = %context, "{message}"
            ),
            LogLevel::Info => info!(
                target: "revalidator::events",
                source, timestamp = %timestamp, context = %context, "{message}"
            ),
            LogLevel::Warn => warn!(
                target: "revalidator::events",
                source, timestamp = %timestamp, context = %context, "{message}"
            ),
            LogLevel::Error => error!(
                target: "revalidator::events",
                source, timestamp = %timestamp, context = %context, "{message}"
            ),
        }
    }
}

/// Keeps entries in memory; used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        mutex_lock(&self.entries, "application::logger", "entries").clone()
    }

    /// True if an entry with this level and source mentions `needle`.
    pub fn contains(&self, level: LogLevel, source: LogSource, needle: &str) -> bool {
        mutex_lock(&self.entries, "application::logger", "contains")
            .iter()
            .any(|entry| {
                entry.level == level && entry.source == source && entry.message.contains(needle)
            })
    }

    pub fn clear(&self) {
        mutex_lock(&self.entries, "application::logger", "clear").clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, entry: &LogEntry) {
        mutex_lock(&self.entries, "application::logger", "emit").push(entry.clone());
    }
}

/// Leveled event logger. Cheap to clone; clones share the sink.
#[derive(Clone)]
pub struct Logger {
    min_level: LogLevel,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

impl Logger {
    pub fn new(min_level: LogLevel, sink: Arc<dyn LogSink>) -> Self {
        Self { min_level, sink }
    }

    /// Logger backed by the global tracing subscriber.
    pub fn tracing(min_level: LogLevel) -> Self {
        Self::new(min_level, Arc::new(TracingSink))
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, source: LogSource, message: &str, context: Option<Value>) {
        if !self.enabled(level) {
            return;
        }
        let entry = LogEntry {
            level,
            source,
            message: message.to_string(),
            context,
            timestamp: OffsetDateTime::now_utc(),
        };
        self.sink.emit(&entry);
    }

    pub fn debug(&self, source: LogSource, message: &str, context: Option<Value>) {
        self.log(LogLevel::Debug, source, message, context);
    }

    pub fn info(&self, source: LogSource, message: &str, context: Option<Value>) {
        self.log(LogLevel::Info, source, message, context);
    }

    pub fn warn(&self, source: LogSource, message: &str, context: Option<Value>) {
        self.log(LogLevel::Warn, source, message, context);
    }

    pub fn error(&self, source: LogSource, message: &str, context: Option<Value>) {
        self.log(LogLevel::Error, source, message, context);
    }

    pub fn webhook_received(&self, client: &str, body_bytes: usize) {
        self.info(
            LogSource::Webhook,
            "Webhook received",
            Some(json!({ "client": client, "bodyBytes": body_bytes })),
        );
    }

    pub fn webhook_processed(&self, document_type: &str, document_id: &str, paths: &[String]) {
        self.info(
            LogSource::Webhook,
            "Webhook processed",
            Some(json!({
                "documentType": document_type,
                "documentId": document_id,
                "paths": paths,
            })),
        );
    }

    pub fn webhook_error(&self, message: &str, details: &[String]) {
        self.error(
            LogSource::Webhook,
            message,
            Some(json!({ "details": details })),
        );
    }

    pub fn revalidation_started(&self, paths: &[String]) {
        self.info(
            LogSource::Revalidation,
            "Revalidation started",
            Some(json!({ "paths": paths, "count": paths.len() })),
        );
    }

    pub fn revalidation_completed(&self, succeeded: &[String], errors: &[String]) {
        let level = if errors.is_empty() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        self.log(
            level,
            LogSource::Revalidation,
            "Revalidation completed",
            Some(json!({
                "succeeded": succeeded.len(),
                "failed": errors.len(),
                "paths": succeeded,
                "errors": errors,
            })),
        );
    }

    pub fn revalidation_error(&self, path: &str, error: &str, circuit_open: bool) {
        let message = if circuit_open {
            "Revalidation skipped: circuit open"
        } else {
            "Revalidation failed"
        };
        self.error(
            LogSource::Revalidation,
            message,
            Some(json!({ "path": path, "error": error, "circuitOpen": circuit_open })),
        );
    }

    pub fn security_event(&self, event: SecurityEvent, client: &str, details: Option<Value>) {
        self.warn(
            LogSource::Security,
            &format!("Security event: {}", event.as_str()),
            Some(json!({
                "event": event.as_str(),
                "client": client,
                "details": details.unwrap_or(Value::Null),
            })),
        );
    }

    /// Record the duration of a named operation.
    pub fn performance(&self, operation: &str, elapsed: Duration, context: Option<Value>) {
        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        histogram!(METRIC_OPERATION_MS, "operation" => operation.to_string()).record(duration_ms);
        self.info(
            LogSource::Performance,
            &format!("{operation} took {duration_ms:.1} ms"),
            Some(json!({
                "operation": operation,
                "durationMs": duration_ms,
                "context": context.unwrap_or(Value::Null),
            })),
        );
    }

    /// Await `future` and record how long it took.
    pub async fn timed<F, T>(&self, operation: &str, future: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let output = future.await;
        self.performance(operation, started.elapsed(), None);
        output
    }
}
