mod support;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use revalidator::application::logger::{LogLevel, LogSource};
use revalidator::resilience::CircuitState;
use revalidator_api_types::WEBHOOK_PATH;
use serde_json::json;
use tower::ServiceExt;

use support::{HarnessOptions, harness, json_body, sign, signed_request, webhook_request};

fn gallery_payload() -> serde_json::Value {
    json!({
        "documentType": "gallery",
        "documentId": "abc-123",
        "slug": { "current": "reuni-2024" },
        "operation": "update",
    })
}

#[tokio::test]
async fn valid_gallery_notification_revalidates_four_paths() {
    let harness = harness(HarnessOptions::default());

    let response = harness
        .router
        .clone()
        .oneshot(signed_request(&gallery_payload(), "203.0.113.1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["revalidated"], true);
    assert_eq!(
        body["paths"],
        json!(["/gallery", "/gallery/reuni-2024", "/", "/api/gallery"])
    );
    assert!(body.get("error").is_none());
    assert!(body["timestamp"].is_string());
    assert_eq!(harness.invalidator.calls().len(), 4);
    assert_eq!(harness.metrics.total_requests(), 1);
    assert!(
        harness
            .sink
            .contains(LogLevel::Info, LogSource::Webhook, "Webhook processed")
    );
}

#[tokio::test]
async fn altered_signature_is_rejected_without_invalidation() {
    let harness = harness(HarnessOptions::default());
    let body = serde_json::to_vec(&gallery_payload()).expect("encode");
    let mut signature = sign(&body);
    // flip the last hex digit
    let last = signature.pop().expect("non-empty signature");
    signature.push(if last == '0' { '1' } else { '0' });

    let response = harness
        .router
        .clone()
        .oneshot(webhook_request(body, &signature, "203.0.113.2"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body, json!({ "error": "Invalid signature" }));
    assert!(harness.invalidator.calls().is_empty());
    assert!(harness.sink.contains(
        LogLevel::Warn,
        LogSource::Security,
        "Security event: invalid_signature"
    ));
}

#[tokio::test]
async fn oversized_body_fails_before_json_parsing() {
    let harness = harness(HarnessOptions::default());
    // 11 KiB of bytes that are not JSON at all
    let body = vec![b'x'; 11 * 1024];
    let signature = sign(&body);

    let response = harness
        .router
        .clone()
        .oneshot(webhook_request(body, &signature, "203.0.113.3"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    let details = body["details"].as_array().expect("details");
    assert_eq!(details.len(), 1);
    let detail = details[0].as_str().expect("detail string");
    assert!(detail.contains("Request body too large: 11264 bytes"), "{detail}");
    assert!(!detail.contains("Invalid JSON"));
    assert!(harness.invalidator.calls().is_empty());
}

#[tokio::test]
async fn unknown_document_type_is_rejected() {
    let harness = harness(HarnessOptions::default());
    let payload = json!({ "documentType": "recipe", "documentId": "r-1" });

    let response = harness
        .router
        .clone()
        .oneshot(signed_request(&payload, "203.0.113.4"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid request");
    let details = body["details"].to_string();
    assert!(details.contains("recipe"), "{details}");
}

#[tokio::test]
async fn transient_failure_is_retried_and_reported_as_success() {
    let harness = harness(HarnessOptions::default());
    harness.invalidator.fail_times("/news", 1);
    let payload = json!({ "documentType": "post", "documentId": "p-1" });

    let response = harness
        .router
        .clone()
        .oneshot(signed_request(&payload, "203.0.113.5"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["paths"], json!(["/news", "/", "/api/news"]));
    assert_eq!(
        harness.invalidator.calls(),
        vec!["/news", "/news", "/", "/api/news"]
    );
    assert!(harness.sink.contains(
        LogLevel::Info,
        LogSource::Revalidation,
        "succeeded after 1 retries"
    ));
}

#[tokio::test]
async fn partial_failure_answers_multi_status() {
    let harness = harness(HarnessOptions::default());
    harness.invalidator.fail_always("/api/gallery");

    let response = harness
        .router
        .clone()
        .oneshot(signed_request(&gallery_payload(), "203.0.113.6"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let body = json_body(response).await;
    assert_eq!(body["revalidated"], true);
    assert_eq!(body["paths"].as_array().map(Vec::len), Some(3));
    let error = body["error"].as_str().expect("error");
    assert!(error.starts_with("/api/gallery: "), "{error}");
}

#[tokio::test]
async fn total_failure_trips_webhook_breaker() {
    let harness = harness(HarnessOptions {
        webhook_breaker_threshold: 1,
        ..HarnessOptions::default()
    });
    for path in ["/announcements", "/"] {
        harness.invalidator.fail_always(path);
    }
    let payload = json!({ "documentType": "announcement", "documentId": "a-1" });

    let first = harness
        .router
        .clone()
        .oneshot(signed_request(&payload, "203.0.113.7"))
        .await
        .expect("router should respond");
    assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(first).await;
    assert_eq!(body["revalidated"], false);
    assert_eq!(harness.webhook_breaker.state().state, CircuitState::Open);

    let calls_before = harness.invalidator.calls().len();
    let second = harness
        .router
        .clone()
        .oneshot(signed_request(&payload, "203.0.113.7"))
        .await
        .expect("router should respond");

    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(second.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(harness.invalidator.calls().len(), calls_before);
}

#[tokio::test]
async fn unrouted_document_type_is_acknowledged_without_revalidation() {
    let harness = harness(HarnessOptions::default());
    let payload = json!({ "documentType": "siteSettings", "documentId": "settings" });

    let response = harness
        .router
        .clone()
        .oneshot(signed_request(&payload, "203.0.113.8"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["revalidated"], false);
    assert_eq!(body["paths"], json!([]));
    assert!(body["error"].as_str().is_some());
    assert!(harness.invalidator.calls().is_empty());
}

#[tokio::test]
async fn missing_secret_is_a_server_error() {
    let harness = harness(HarnessOptions {
        secret: None,
        ..HarnessOptions::default()
    });

    let response = harness
        .router
        .clone()
        .oneshot(signed_request(&gallery_payload(), "203.0.113.9"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.invalidator.calls().is_empty());
}

#[tokio::test]
async fn webhook_rate_limit_answers_429_with_retry_after() {
    let harness = harness(HarnessOptions {
        webhook_limit: 2,
        ..HarnessOptions::default()
    });

    for _ in 0..2 {
        let response = harness
            .router
            .clone()
            .oneshot(signed_request(&gallery_payload(), "198.51.100.1"))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let limited = harness
        .router
        .clone()
        .oneshot(signed_request(&gallery_payload(), "198.51.100.1"))
        .await
        .expect("router should respond");

    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key(header::RETRY_AFTER));
    assert!(harness.sink.contains(
        LogLevel::Warn,
        LogSource::Security,
        "Security event: rate_limit_exceeded"
    ));

    // a different caller has its own window
    let other = harness
        .router
        .clone()
        .oneshot(signed_request(&gallery_payload(), "198.51.100.2"))
        .await
        .expect("router should respond");
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn repeated_bad_signatures_lock_out_the_caller() {
    let harness = harness(HarnessOptions {
        failed_signature_limit: 2,
        ..HarnessOptions::default()
    });
    let body = serde_json::to_vec(&gallery_payload()).expect("encode");
    let bad = format!("sha256={}", "0".repeat(64));

    for _ in 0..2 {
        let response = harness
            .router
            .clone()
            .oneshot(webhook_request(body.clone(), &bad, "192.0.2.9"))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // even a correctly signed request is refused while over budget
    let response = harness
        .router
        .clone()
        .oneshot(signed_request(&gallery_payload(), "192.0.2.9"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(harness.invalidator.calls().is_empty());
}

#[tokio::test]
async fn get_is_method_not_allowed() {
    let harness = harness(HarnessOptions::default());
    let request = Request::builder()
        .method(Method::GET)
        .uri(WEBHOOK_PATH)
        .body(Body::empty())
        .expect("request should build");

    let response = harness
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Method not allowed");
}

#[tokio::test]
async fn missing_signature_header_is_a_validation_error() {
    let harness = harness(HarnessOptions::default());
    let body = serde_json::to_vec(&gallery_payload()).expect("encode");
    let request = Request::builder()
        .method(Method::POST)
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request should build");

    let response = harness
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // missing user agent is logged, not rejected
    assert!(harness.sink.contains(
        LogLevel::Warn,
        LogSource::Security,
        "Security event: suspicious_user_agent"
    ));
}
