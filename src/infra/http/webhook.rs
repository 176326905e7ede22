//! `POST /api/revalidate`: verify, derive paths, invalidate.

use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use revalidator_api_types::RevalidateResponse;
use serde_json::json;
use time::OffsetDateTime;

use crate::application::logger::{LogSource, SecurityEvent};
use crate::resilience::CircuitError;
use crate::revalidation::BatchOutcome;
use crate::webhook::{WebhookError, verify_signature};

use super::HttpState;
use super::client::client_id;

/// Batch in which no path could be invalidated; counts against the webhook breaker.
#[derive(Debug)]
struct AllPathsFailed(BatchOutcome);

impl fmt::Display for AllPathsFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all paths failed: {}", self.0.errors.join("; "))
    }
}

struct Dispatched {
    status: StatusCode,
    outcome: &'static str,
    body: RevalidateResponse,
}

pub(super) async fn revalidate(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.record_request();
    let client = client_id(&headers);

    match dispatch(&state, &headers, &body, &client).await {
        Ok(dispatched) => {
            counter!("revalidator_webhook_requests_total", "outcome" => dispatched.outcome)
                .increment(1);
            (dispatched.status, Json(dispatched.body)).into_response()
        }
        Err(err) => {
            counter!("revalidator_webhook_requests_total", "outcome" => err.outcome())
                .increment(1);
            err.into_response()
        }
    }
}

pub(super) async fn method_not_allowed(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Response {
    let client = client_id(&headers);
    state
        .logger
        .security_event(SecurityEvent::MethodNotAllowed, &client, None);
    counter!(
        "revalidator_webhook_requests_total",
        "outcome" => WebhookError::MethodNotAllowed.outcome()
    )
    .increment(1);
    WebhookError::MethodNotAllowed.into_response()
}

async fn dispatch(
    state: &HttpState,
    headers: &HeaderMap,
    body: &[u8],
    client: &str,
) -> Result<Dispatched, WebhookError> {
    let decision = state.webhook_limiter.check_limit(client);
    if !decision.allowed {
        state.logger.security_event(
            SecurityEvent::RateLimitExceeded,
            client,
            Some(json!({
                "limiter": state.webhook_limiter.name(),
                "totalHits": decision.total_hits,
            })),
        );
        return Err(WebhookError::RateLimited {
            limiter: state.webhook_limiter.name(),
            retry_after_secs: decision.retry_after_secs(),
        });
    }

    let failures = state.failed_signature_limiter.peek(client);
    if !failures.allowed {
        state.logger.security_event(
            SecurityEvent::RateLimitExceeded,
            client,
            Some(json!({
                "limiter": state.failed_signature_limiter.name(),
                "totalHits": failures.total_hits,
            })),
        );
        return Err(WebhookError::RateLimited {
            limiter: state.failed_signature_limiter.name(),
            retry_after_secs: failures.retry_after_secs(),
        });
    }

    let Some(secret) = state.secret.as_ref() else {
        state.logger.error(
            LogSource::Webhook,
            "Webhook secret is not configured",
            None,
        );
        return Err(WebhookError::MissingSecret);
    };

    state.logger.webhook_received(client, body.len());

    let validated = state
        .validator
        .validate_webhook_request(headers, body, client)
        .map_err(|failure| {
            state
                .logger
                .webhook_error("Webhook validation failed", &failure.errors);
            WebhookError::from(failure)
        })?;

    if !verify_signature(body, &validated.signature, secret) {
        let hit = state.failed_signature_limiter.check_limit(client);
        state.logger.security_event(
            SecurityEvent::InvalidSignature,
            client,
            Some(json!({
                "documentType": validated.notification.document_type.as_str(),
                "failedAttempts": hit.total_hits,
            })),
        );
        return Err(WebhookError::InvalidSignature);
    }

    let notification = validated.notification;
    let Some(paths) = state.manager.paths_for(&notification) else {
        state.logger.info(
            LogSource::Webhook,
            "No revalidation rules for document type",
            Some(json!({
                "documentType": notification.document_type.as_str(),
                "documentId": notification.document_id,
            })),
        );
        return Ok(Dispatched {
            status: StatusCode::OK,
            outcome: "unrouted",
            body: RevalidateResponse {
                revalidated: false,
                paths: Vec::new(),
                timestamp: OffsetDateTime::now_utc(),
                error: Some(format!(
                    "No revalidation rules for document type `{}`",
                    notification.document_type.as_str()
                )),
            },
        });
    };

    let paths = paths.into_vec();
    let manager = Arc::clone(&state.manager);
    let result = state
        .webhook_breaker
        .execute(
            || async move {
                let outcome = manager.execute_batch_revalidation(&paths).await;
                if outcome.succeeded.is_empty() {
                    Err(AllPathsFailed(outcome))
                } else {
                    Ok(outcome)
                }
            },
            "webhook_dispatch",
        )
        .await;

    match result {
        Ok(outcome) => {
            state.logger.webhook_processed(
                notification.document_type.as_str(),
                &notification.document_id,
                &outcome.succeeded,
            );
            let partial = !outcome.errors.is_empty();
            Ok(Dispatched {
                status: if partial {
                    StatusCode::MULTI_STATUS
                } else {
                    StatusCode::OK
                },
                outcome: if partial { "partial" } else { "revalidated" },
                body: RevalidateResponse {
                    revalidated: true,
                    paths: outcome.succeeded,
                    timestamp: OffsetDateTime::now_utc(),
                    error: partial.then(|| outcome.errors.join("; ")),
                },
            })
        }
        Err(CircuitError::Operation(AllPathsFailed(outcome))) => {
            state
                .logger
                .webhook_error("Revalidation failed for every path", &outcome.errors);
            Ok(Dispatched {
                status: StatusCode::SERVICE_UNAVAILABLE,
                outcome: "failed",
                body: RevalidateResponse {
                    revalidated: false,
                    paths: Vec::new(),
                    timestamp: OffsetDateTime::now_utc(),
                    error: Some(outcome.errors.join("; ")),
                },
            })
        }
        Err(CircuitError::Open {
            breaker,
            retry_in_ms,
        }) => {
            state.logger.webhook_error(
                "Webhook dispatch rejected: circuit open",
                &[format!("retry in {retry_in_ms} ms")],
            );
            Err(WebhookError::CircuitOpen {
                breaker,
                retry_in_ms,
            })
        }
    }
}
