//! Inbound webhook verification: signatures, payload validation, sanitization.

pub mod error;
pub mod sanitize;
pub mod signature;
pub mod validation;

pub use error::WebhookError;
pub use signature::{
    SignatureError, WebhookSecret, compute_signature, signature_header_value, verify_signature,
};
pub use validation::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_USER_AGENT_HINT, FailureStage, RequestValidator,
    ValidatedRequest, ValidationFailure, validate_webhook_payload,
};
