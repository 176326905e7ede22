use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use revalidator_api_types::ErrorResponse;

use crate::application::error::ErrorReport;
use crate::webhook::WebhookError;

/// JSON error body plus the headers and diagnostic the logging middleware reads.
#[derive(Debug)]
pub struct ApiError {
    source: &'static str,
    status: StatusCode,
    error: &'static str,
    details: Vec<String>,
    retry_after_secs: Option<u64>,
    allow: Option<&'static str>,
    diagnostic: String,
}

impl ApiError {
    pub fn new(source: &'static str, status: StatusCode, error: &'static str) -> Self {
        Self {
            source,
            status,
            error,
            details: Vec::new(),
            retry_after_secs: None,
            allow: None,
            diagnostic: error.to_string(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds.max(1));
        self
    }

    pub fn with_allow(mut self, methods: &'static str) -> Self {
        self.allow = Some(methods);
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = diagnostic.into();
        self
    }

    pub fn bad_request(source: &'static str, error: &'static str) -> Self {
        Self::new(source, StatusCode::BAD_REQUEST, error)
    }

    pub fn unauthorized(source: &'static str) -> Self {
        Self::new(source, StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn rate_limited(source: &'static str, retry_after_secs: u64) -> Self {
        Self::new(source, StatusCode::TOO_MANY_REQUESTS, "Too many requests")
            .with_retry_after(retry_after_secs)
            .with_diagnostic(format!("rate_limited: retry_after={retry_after_secs}"))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.error.to_string(),
            details: self.details,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after_secs
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        if let Some(methods) = self.allow {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(methods));
        }
        ErrorReport::from_message(self.source, self.status, self.diagnostic).attach(&mut response);
        response
    }
}

const WEBHOOK_SOURCE: &str = "infra::http::webhook";

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let diagnostic = err.to_string();
        let api = match err {
            WebhookError::Validation { errors, .. } => {
                ApiError::bad_request(WEBHOOK_SOURCE, "Invalid request").with_details(errors)
            }
            WebhookError::InvalidSignature => {
                ApiError::new(WEBHOOK_SOURCE, StatusCode::UNAUTHORIZED, "Invalid signature")
            }
            WebhookError::MissingSecret => ApiError::new(
                WEBHOOK_SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error",
            ),
            WebhookError::RateLimited {
                retry_after_secs, ..
            } => ApiError::rate_limited(WEBHOOK_SOURCE, retry_after_secs),
            WebhookError::CircuitOpen { retry_in_ms, .. } => ApiError::new(
                WEBHOOK_SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
            )
            .with_retry_after(retry_in_ms.div_ceil(1000)),
            WebhookError::MethodNotAllowed => ApiError::new(
                WEBHOOK_SOURCE,
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed",
            )
            .with_allow("POST"),
        };
        api.with_diagnostic(diagnostic)
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_errors_map_to_documented_statuses() {
        let cases = [
            (
                WebhookError::Validation {
                    stage: "payload",
                    errors: vec!["bad".into()],
                },
                StatusCode::BAD_REQUEST,
            ),
            (WebhookError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (WebhookError::MissingSecret, StatusCode::INTERNAL_SERVER_ERROR),
            (
                WebhookError::RateLimited {
                    limiter: "webhook",
                    retry_after_secs: 12,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                WebhookError::CircuitOpen {
                    breaker: "webhook",
                    retry_in_ms: 1500,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (WebhookError::MethodNotAllowed, StatusCode::METHOD_NOT_ALLOWED),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn retry_after_rounds_up_open_circuit_wait() {
        let response = WebhookError::CircuitOpen {
            breaker: "webhook",
            retry_in_ms: 1500,
        }
        .into_response();

        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("2"))
        );
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn method_not_allowed_advertises_post() {
        let response = WebhookError::MethodNotAllowed.into_response();

        assert_eq!(
            response.headers().get(header::ALLOW),
            Some(&HeaderValue::from_static("POST"))
        );
    }
}
