//! Shape and header validation for inbound change notifications.

use axum::http::HeaderMap;
use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use revalidator_api_types::{Operation, SIGNATURE_HEADER, SIGNATURE_PREFIX};
use serde_json::{Map, Value, json};

use crate::application::logger::{Logger, SecurityEvent};
use crate::domain::notification::{ChangeNotification, DocumentType, is_identifier};
use crate::webhook::sanitize::{
    MAX_CATEGORY_LEN, MAX_DATASET_LEN, MAX_DOCUMENT_ID_LEN, MAX_DOCUMENT_TYPE_LEN,
    MAX_PROJECT_ID_LEN, MAX_REVISION_LEN, MAX_SLUG_LEN, sanitize,
};

pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024;
pub const DEFAULT_USER_AGENT_HINT: &str = "webhook";

/// Stage at which a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Headers,
    Size,
    Json,
    Payload,
}

impl FailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStage::Headers => "headers",
            FailureStage::Size => "size",
            FailureStage::Json => "json",
            FailureStage::Payload => "payload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub stage: FailureStage,
    pub errors: Vec<String>,
}

impl ValidationFailure {
    fn new(stage: FailureStage, errors: Vec<String>) -> Self {
        Self { stage, errors }
    }
}

/// A request that passed header, size and payload checks. The signature
/// still needs verifying against the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub notification: ChangeNotification,
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct RequestValidator {
    logger: Logger,
    max_body_bytes: usize,
    user_agent_hint: String,
}

impl RequestValidator {
    pub fn new(logger: Logger, max_body_bytes: usize, user_agent_hint: impl Into<String>) -> Self {
        Self {
            logger,
            max_body_bytes,
            user_agent_hint: user_agent_hint.into(),
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Validate headers, body size and payload, in that order.
    ///
    /// Header and size failures return before the body is parsed.
    pub fn validate_webhook_request(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        client: &str,
    ) -> Result<ValidatedRequest, ValidationFailure> {
        let signature = self.validate_headers(headers, client)?;

        if body.len() > self.max_body_bytes {
            return Err(ValidationFailure::new(
                FailureStage::Size,
                vec![format!(
                    "Request body too large: {} bytes (max {} bytes)",
                    body.len(),
                    self.max_body_bytes
                )],
            ));
        }

        let value: Value = serde_json::from_slice(body).map_err(|err| {
            ValidationFailure::new(FailureStage::Json, vec![format!("Invalid JSON: {err}")])
        })?;

        let notification = validate_webhook_payload(&value)
            .map_err(|errors| ValidationFailure::new(FailureStage::Payload, errors))?;

        Ok(ValidatedRequest {
            notification,
            signature,
        })
    }

    fn validate_headers(
        &self,
        headers: &HeaderMap,
        client: &str,
    ) -> Result<String, ValidationFailure> {
        let mut errors = Vec::new();

        let signature = match headers.get(SIGNATURE_HEADER).map(|v| v.to_str()) {
            None => {
                errors.push(format!("Missing {SIGNATURE_HEADER} header"));
                None
            }
            Some(Err(_)) => {
                errors.push(format!("{SIGNATURE_HEADER} header is not valid ASCII"));
                None
            }
            Some(Ok(value)) => {
                let value = value.trim();
                let well_formed = value
                    .strip_prefix(SIGNATURE_PREFIX)
                    .is_some_and(|hex| !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()));
                if !well_formed {
                    errors.push(format!(
                        "{SIGNATURE_HEADER} must have the form {SIGNATURE_PREFIX}<hex>"
                    ));
                }
                Some(value.to_string())
            }
        };

        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
        if !is_json {
            errors.push("Content-Type must be application/json".to_string());
        }

        let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
        let expected = user_agent.is_some_and(|ua| {
            ua.to_ascii_lowercase()
                .contains(&self.user_agent_hint.to_ascii_lowercase())
        });
        if !expected {
            self.logger.security_event(
                SecurityEvent::SuspiciousUserAgent,
                client,
                Some(json!({ "userAgent": user_agent })),
            );
        }

        match signature {
            Some(signature) if errors.is_empty() => Ok(signature),
            _ => Err(ValidationFailure::new(FailureStage::Headers, errors)),
        }
    }
}

fn field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|value| !value.is_null())
}

fn optional_string(
    object: &Map<String, Value>,
    key: &str,
    max: usize,
    errors: &mut Vec<String>,
) -> Option<String> {
    match field(object, key) {
        None => None,
        Some(Value::String(value)) => Some(sanitize(value, max)).filter(|v| !v.is_empty()),
        Some(_) => {
            errors.push(format!("{key} must be a string"));
            None
        }
    }
}

fn identifier(value: &str, key: &str, max: usize, errors: &mut Vec<String>) -> Option<String> {
    if !is_identifier(value) {
        errors.push(format!(
            "{key} must contain only letters, digits, hyphens and underscores"
        ));
        return None;
    }
    if value.chars().count() > max {
        errors.push(format!("{key} must be at most {max} characters"));
        return None;
    }
    Some(sanitize(value, max))
}

/// Check a parsed notification and produce a sanitized copy.
///
/// Every violation is reported; `null` counts as absent for optional fields.
pub fn validate_webhook_payload(value: &Value) -> Result<ChangeNotification, Vec<String>> {
    let Some(object) = value.as_object() else {
        return Err(vec!["Payload must be a JSON object".to_string()]);
    };
    let mut errors = Vec::new();

    let document_type = match field(object, "documentType") {
        Some(Value::String(raw)) => {
            let cleaned = sanitize(raw, MAX_DOCUMENT_TYPE_LEN);
            let parsed = DocumentType::parse(&cleaned);
            if parsed.is_none() {
                errors.push(format!(
                    "documentType `{cleaned}` is not supported (allowed: {})",
                    DocumentType::allowed_list()
                ));
            }
            parsed
        }
        Some(_) => {
            errors.push("documentType must be a string".to_string());
            None
        }
        None => {
            errors.push("documentType is required".to_string());
            None
        }
    };

    let document_id = match field(object, "documentId") {
        Some(Value::String(raw)) => {
            identifier(raw, "documentId", MAX_DOCUMENT_ID_LEN, &mut errors)
        }
        Some(_) => {
            errors.push("documentId must be a string".to_string());
            None
        }
        None => {
            errors.push("documentId is required".to_string());
            None
        }
    };

    let revision = optional_string(object, "revision", MAX_REVISION_LEN, &mut errors);

    let operation = match field(object, "operation") {
        None => None,
        Some(Value::String(raw)) => {
            let parsed = Operation::parse(raw.trim());
            if parsed.is_none() {
                errors.push("operation must be one of create, update, delete".to_string());
            }
            parsed
        }
        Some(_) => {
            errors.push("operation must be a string".to_string());
            None
        }
    };

    let slug = match field(object, "slug") {
        None => None,
        Some(Value::Object(slug)) => match field(slug, "current") {
            Some(Value::String(current)) => {
                identifier(current, "slug.current", MAX_SLUG_LEN, &mut errors)
            }
            _ => {
                errors.push("slug.current is required and must be a string".to_string());
                None
            }
        },
        Some(_) => {
            errors.push("slug must be an object with a `current` string".to_string());
            None
        }
    };

    let category = optional_string(object, "category", MAX_CATEGORY_LEN, &mut errors);
    let project_id = optional_string(object, "projectId", MAX_PROJECT_ID_LEN, &mut errors);
    let dataset = optional_string(object, "dataset", MAX_DATASET_LEN, &mut errors);

    match (document_type, document_id) {
        (Some(document_type), Some(document_id)) if errors.is_empty() => Ok(ChangeNotification {
            document_type,
            document_id,
            revision,
            slug,
            category,
            operation,
            project_id,
            dataset,
        }),
        _ => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::HeaderValue;

    use super::*;
    use crate::application::logger::{LogLevel, LogSource, MemorySink};

    fn validator() -> (RequestValidator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let logger = Logger::new(LogLevel::Debug, sink.clone());
        (
            RequestValidator::new(logger, DEFAULT_MAX_BODY_BYTES, DEFAULT_USER_AGENT_HINT),
            sink,
        )
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("sha256=abcdef01"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("Sanity.io webhook delivery"));
        headers
    }

    #[test]
    fn accepts_well_formed_request() {
        let (validator, sink) = validator();
        let body = br#"{"documentType":"gallery","documentId":"g-1","slug":{"current":"reuni"}}"#;

        let validated = validator
            .validate_webhook_request(&headers(), body, "10.0.0.1")
            .expect("valid request");

        assert_eq!(validated.signature, "sha256=abcdef01");
        assert_eq!(validated.notification.document_type, DocumentType::Gallery);
        assert_eq!(validated.notification.slug.as_deref(), Some("reuni"));
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn rejects_missing_signature_and_wrong_content_type() {
        let (validator, _) = validator();
        let mut headers = headers();
        headers.remove(SIGNATURE_HEADER);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let failure = validator
            .validate_webhook_request(&headers, b"{}", "c")
            .expect_err("invalid headers");

        assert_eq!(failure.stage, FailureStage::Headers);
        assert_eq!(failure.errors.len(), 2);
    }

    #[test]
    fn rejects_malformed_signature_header() {
        let (validator, _) = validator();
        let mut headers = headers();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("md5=abc"));

        let failure = validator
            .validate_webhook_request(&headers, b"{}", "c")
            .expect_err("bad header");
        assert_eq!(failure.stage, FailureStage::Headers);
    }

    #[test]
    fn oversized_body_is_rejected_before_parsing() {
        let (validator, _) = validator();
        let body = vec![b'{'; DEFAULT_MAX_BODY_BYTES + 1];

        let failure = validator
            .validate_webhook_request(&headers(), &body, "c")
            .expect_err("too large");

        assert_eq!(failure.stage, FailureStage::Size);
        assert!(failure.errors[0].contains(&format!("{} bytes", DEFAULT_MAX_BODY_BYTES + 1)));
    }

    #[test]
    fn unexpected_user_agent_is_logged_not_rejected() {
        let (validator, sink) = validator();
        let mut headers = headers();
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let body = br#"{"documentType":"post","documentId":"p-1"}"#;

        assert!(validator.validate_webhook_request(&headers, body, "c").is_ok());
        assert!(sink.contains(LogLevel::Warn, LogSource::Security, "suspicious_user_agent"));
    }

    #[test]
    fn invalid_json_is_reported() {
        let (validator, _) = validator();
        let failure = validator
            .validate_webhook_request(&headers(), b"{not json", "c")
            .expect_err("bad json");
        assert_eq!(failure.stage, FailureStage::Json);
    }

    #[test]
    fn payload_errors_accumulate() {
        let errors = validate_webhook_payload(&json!({
            "documentType": "recipe",
            "documentId": "bad id!",
            "operation": "upsert",
            "slug": { "current": 5 },
            "category": 12,
        }))
        .expect_err("invalid payload");

        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors[0].contains("recipe"));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let errors = validate_webhook_payload(&json!(["gallery"])).expect_err("array");
        assert_eq!(errors, vec!["Payload must be a JSON object".to_string()]);
    }

    #[test]
    fn null_optionals_count_as_absent() {
        let notification = validate_webhook_payload(&json!({
            "documentType": "event",
            "documentId": "e-1",
            "slug": null,
            "revision": null,
            "operation": "create",
        }))
        .expect("valid payload");

        assert_eq!(notification.slug, None);
        assert_eq!(notification.operation, Some(Operation::Create));
    }

    #[test]
    fn optional_strings_are_sanitized() {
        let notification = validate_webhook_payload(&json!({
            "documentType": "post",
            "documentId": "p-1",
            "category": "  <b>News & Events</b>  ",
            "revision": "rev\u{0000}1",
        }))
        .expect("valid payload");

        assert_eq!(notification.category.as_deref(), Some("bNews  Events/b"));
        assert_eq!(notification.revision.as_deref(), Some("rev1"));
    }

    #[test]
    fn overlong_identifier_is_rejected() {
        let errors = validate_webhook_payload(&json!({
            "documentType": "post",
            "documentId": "a".repeat(MAX_DOCUMENT_ID_LEN + 1),
        }))
        .expect_err("too long");
        assert!(errors[0].contains("at most"));
    }
}
