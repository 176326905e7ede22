#![allow(dead_code)]

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use http_body_util::BodyExt;
use revalidator::application::health::{HealthReporter, HealthThresholds, ServiceMetrics};
use revalidator::application::logger::{LogLevel, Logger, MemorySink};
use revalidator::application::ports::{
    CacheInvalidator, ContentStore, ContentStoreError, InvalidationError,
};
use revalidator::infra::http::{self, AdminState, HttpState};
use revalidator::resilience::{
    CircuitBreaker, CircuitBreakerConfig, FixedWindowRateLimiter, RateLimitConfig, RetryManager,
    RetryPolicy,
};
use revalidator::revalidation::{RevalidationConfig, RevalidationManager};
use revalidator::webhook::{RequestValidator, WebhookSecret, signature_header_value};
use revalidator_api_types::{SIGNATURE_HEADER, WEBHOOK_PATH};
use serde_json::Value;
use time::OffsetDateTime;

pub const SECRET: &str = "integration-secret";
pub const USER_AGENT: &str = "content-webhook/1.0";

/// Invalidator that records calls and fails scripted paths.
#[derive(Default)]
pub struct ScriptedInvalidator {
    calls: Mutex<Vec<String>>,
    /// Remaining failures per path; `u32::MAX` fails forever.
    failures: Mutex<HashMap<String, u32>>,
}

impl ScriptedInvalidator {
    pub fn fail_times(&self, path: &str, times: u32) {
        self.failures
            .lock()
            .expect("failures")
            .insert(path.to_string(), times);
    }

    pub fn fail_always(&self, path: &str) {
        self.fail_times(path, u32::MAX);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }
}

#[async_trait]
impl CacheInvalidator for ScriptedInvalidator {
    async fn invalidate(&self, path: &str) -> Result<(), InvalidationError> {
        self.calls.lock().expect("calls").push(path.to_string());
        let mut failures = self.failures.lock().expect("failures");
        match failures.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                Err(InvalidationError::Unavailable(format!("{path} is down")))
            }
            _ => Ok(()),
        }
    }
}

/// Content store with a settable latest timestamp or failure.
#[derive(Default)]
pub struct StubContentStore {
    pub latest: Mutex<Option<OffsetDateTime>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl ContentStore for StubContentStore {
    async fn latest_modification(&self) -> Result<Option<OffsetDateTime>, ContentStoreError> {
        if *self.fail.lock().expect("fail") {
            return Err(ContentStoreError::Transport("connection refused".into()));
        }
        Ok(*self.latest.lock().expect("latest"))
    }

    async fn changed_since(&self, _since: OffsetDateTime) -> Result<Vec<Value>, ContentStoreError> {
        Ok(Vec::new())
    }
}

pub struct HarnessOptions {
    pub secret: Option<&'static str>,
    pub webhook_limit: u32,
    pub failed_signature_limit: u32,
    pub health_limit: u32,
    pub webhook_breaker_threshold: u32,
    pub admin_token: Option<&'static str>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            secret: Some(SECRET),
            webhook_limit: 30,
            failed_signature_limit: 5,
            health_limit: 60,
            webhook_breaker_threshold: 5,
            admin_token: None,
        }
    }
}

pub struct Harness {
    pub router: Router,
    pub admin_router: Router,
    pub invalidator: Arc<ScriptedInvalidator>,
    pub content_store: Arc<StubContentStore>,
    pub sink: Arc<MemorySink>,
    pub manager: Arc<RevalidationManager>,
    pub webhook_breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<ServiceMetrics>,
}

fn limiter(name: &'static str, max: u32) -> Arc<FixedWindowRateLimiter> {
    Arc::new(FixedWindowRateLimiter::new(
        name,
        RateLimitConfig {
            max_requests: NonZeroU32::new(max).expect("non-zero limit"),
            window: Duration::from_secs(60),
        },
    ))
}

pub fn harness(options: HarnessOptions) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let logger = Logger::new(LogLevel::Debug, sink.clone());
    let invalidator = Arc::new(ScriptedInvalidator::default());
    let content_store = Arc::new(StubContentStore::default());

    let config = RevalidationConfig {
        path_retry: RetryPolicy::new(
            2,
            Duration::from_millis(5),
            Duration::from_millis(20),
            2.0,
            false,
        )
        .expect("retry policy"),
        batch_attempts: 1,
        batch_delay: Duration::from_millis(5),
        debounce: Duration::from_millis(5),
    };
    let revalidation_breaker = Arc::new(CircuitBreaker::new(
        "revalidation",
        CircuitBreakerConfig {
            failure_threshold: 50,
            ..CircuitBreakerConfig::default()
        },
        logger.clone(),
    ));
    let manager = Arc::new(RevalidationManager::new(
        invalidator.clone(),
        revalidation_breaker,
        RetryManager::with_seed(logger.clone(), 7),
        logger.clone(),
        config,
    ));
    let webhook_breaker = Arc::new(CircuitBreaker::new(
        "webhook",
        CircuitBreakerConfig {
            failure_threshold: options.webhook_breaker_threshold,
            ..CircuitBreakerConfig::default()
        },
        logger.clone(),
    ));

    let webhook_limiter = limiter("webhook", options.webhook_limit);
    let failed_signature_limiter = limiter("failed_signature", options.failed_signature_limit);
    let health_limiter = limiter("health", options.health_limit);
    let metrics = Arc::new(ServiceMetrics::new());

    let health = Arc::new(
        HealthReporter::new(
            webhook_breaker.clone(),
            manager.clone(),
            content_store.clone(),
            metrics.clone(),
            HealthThresholds::default(),
            logger.clone(),
        )
        .with_limiters(vec![
            webhook_limiter.clone(),
            failed_signature_limiter.clone(),
            health_limiter.clone(),
        ]),
    );

    let router = http::build_router(HttpState {
        validator: Arc::new(RequestValidator::new(logger.clone(), 10 * 1024, "webhook")),
        secret: options
            .secret
            .map(|secret| WebhookSecret::new(secret).expect("secret")),
        manager: manager.clone(),
        webhook_breaker: webhook_breaker.clone(),
        webhook_limiter,
        failed_signature_limiter,
        metrics: metrics.clone(),
        logger: logger.clone(),
    });
    let admin_router = http::build_admin_router(AdminState {
        health,
        health_limiter,
        admin_token: options.admin_token.map(Arc::from),
        logger,
    });

    Harness {
        router,
        admin_router,
        invalidator,
        content_store,
        sink,
        manager,
        webhook_breaker,
        metrics,
    }
}

pub fn sign(body: &[u8]) -> String {
    let secret = WebhookSecret::new(SECRET).expect("secret");
    signature_header_value(&secret, body).expect("signature")
}

pub fn webhook_request(body: Vec<u8>, signature: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .header("user-agent", USER_AGENT)
        .header("x-forwarded-for", client)
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .expect("request should build")
}

pub fn signed_request(payload: &Value, client: &str) -> Request<Body> {
    let body = serde_json::to_vec(payload).expect("encode payload");
    let signature = sign(&body);
    webhook_request(body, &signature, client)
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
