use thiserror::Error;

use crate::webhook::validation::ValidationFailure;

/// Ways a webhook request can be refused before or during dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("request validation failed at {stage}: {}", errors.join("; "))]
    Validation {
        stage: &'static str,
        errors: Vec<String>,
    },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("rate limit `{limiter}` exceeded, retry after {retry_after_secs} s")]
    RateLimited {
        limiter: &'static str,
        retry_after_secs: u64,
    },
    #[error("circuit `{breaker}` is open, retry in {retry_in_ms} ms")]
    CircuitOpen {
        breaker: &'static str,
        retry_in_ms: u64,
    },
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl From<ValidationFailure> for WebhookError {
    fn from(failure: ValidationFailure) -> Self {
        WebhookError::Validation {
            stage: failure.stage.as_str(),
            errors: failure.errors,
        }
    }
}

impl WebhookError {
    /// Label used for the request outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            WebhookError::Validation { .. } => "invalid",
            WebhookError::InvalidSignature => "unauthorized",
            WebhookError::MissingSecret => "misconfigured",
            WebhookError::RateLimited { .. } => "rate_limited",
            WebhookError::CircuitOpen { .. } => "circuit_open",
            WebhookError::MethodNotAllowed => "method_not_allowed",
        }
    }
}
