//! HTTP surface: the public webhook listener and the admin health listener.

mod client;
mod error;
mod health;
mod middleware;
mod webhook;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware as axum_middleware};
use revalidator_api_types::{HEALTH_PATH, WEBHOOK_PATH};

use crate::application::health::{HealthReporter, ServiceMetrics};
use crate::application::logger::Logger;
use crate::resilience::{CircuitBreaker, FixedWindowRateLimiter};
use crate::revalidation::RevalidationManager;
use crate::webhook::{RequestValidator, WebhookSecret};

pub use client::client_id;
pub use error::ApiError;
pub use middleware::RequestContext;

use middleware::{log_responses, set_request_context};

/// Bodies above this multiple of the validator limit are refused by axum
/// before they reach the handler.
const TRANSPORT_BODY_FACTOR: usize = 4;

#[derive(Clone)]
pub struct HttpState {
    pub validator: Arc<RequestValidator>,
    /// `None` answers every webhook with 500.
    pub secret: Option<WebhookSecret>,
    pub manager: Arc<RevalidationManager>,
    pub webhook_breaker: Arc<CircuitBreaker>,
    pub webhook_limiter: Arc<FixedWindowRateLimiter>,
    pub failed_signature_limiter: Arc<FixedWindowRateLimiter>,
    pub metrics: Arc<ServiceMetrics>,
    pub logger: Logger,
}

#[derive(Clone)]
pub struct AdminState {
    pub health: Arc<HealthReporter>,
    pub health_limiter: Arc<FixedWindowRateLimiter>,
    /// Required as a bearer token on administrative actions when set.
    pub admin_token: Option<Arc<str>>,
    pub logger: Logger,
}

pub fn build_router(state: HttpState) -> Router {
    let body_limit = state
        .validator
        .max_body_bytes()
        .saturating_mul(TRANSPORT_BODY_FACTOR);
    Router::new()
        .route(
            WEBHOOK_PATH,
            post(webhook::revalidate).fallback(webhook::method_not_allowed),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            HEALTH_PATH,
            get(health::health_report).post(health::health_action),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
