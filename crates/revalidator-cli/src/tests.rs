use httpmock::prelude::*;
use reqwest::StatusCode;
use revalidator_api_types::{HealthStatus, SIGNATURE_HEADER};
use serde_json::json;

use crate::args::{Cli, Commands, OperationArg, TriggerArgs};
use crate::client::{CliError, Ctx, build_ctx_from_cli};
use crate::notification_from_args;
use crate::sign::signature_header;

fn trigger_args() -> TriggerArgs {
    TriggerArgs {
        document_type: "gallery".to_string(),
        document_id: "abc-123".to_string(),
        slug: Some("reuni-2024".to_string()),
        category: None,
        revision: None,
        operation: OperationArg::Update,
    }
}

fn ctx(server: &MockServer) -> Ctx {
    Ctx::new(Some(&server.base_url()), Some(&server.base_url()))
        .expect("ctx")
        .with_secret(Some("test-secret".to_string()))
}

#[test]
fn signature_matches_reference_hmac() -> Result<(), CliError> {
    // RFC 4231 test case 2
    let header = signature_header("Jefe", b"what do ya want for nothing?")?;
    assert_eq!(
        header,
        "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
    );
    Ok(())
}

#[test]
fn build_ctx_errors_are_deferred_until_needed() {
    let cli = Cli {
        url: None,
        admin_url: Some("http://127.0.0.1:3001".to_string()),
        secret_file: None,
        secret_env: Some(String::new()),
        admin_token: None,
        command: Commands::Health,
    };

    let ctx = build_ctx_from_cli(&cli).expect("ctx");
    assert!(ctx.base.is_none());
    assert!(ctx.secret.is_none());
}

#[tokio::test]
async fn trigger_posts_signed_notification() {
    let server = MockServer::start_async().await;
    let notification = notification_from_args(trigger_args());
    let body = serde_json::to_vec(&notification).expect("encode");
    let expected_signature = signature_header("test-secret", &body).expect("sign");

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/revalidate")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, expected_signature.as_str())
                .json_body(json!({
                    "documentType": "gallery",
                    "documentId": "abc-123",
                    "slug": { "current": "reuni-2024" },
                    "operation": "update",
                }));
            then.status(200).json_body(json!({
                "revalidated": true,
                "paths": ["/gallery", "/gallery/reuni-2024", "/", "/api/gallery"],
                "timestamp": "2024-05-01T10:00:00Z",
            }));
        })
        .await;

    let reply = ctx(&server).trigger(&notification).await.expect("trigger");

    mock.assert_async().await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.revalidated);
    assert_eq!(reply.body.paths.len(), 4);
}

#[tokio::test]
async fn trigger_requires_secret() {
    let server = MockServer::start_async().await;
    let ctx = Ctx::new(Some(&server.base_url()), None).expect("ctx");

    let err = ctx
        .trigger(&notification_from_args(trigger_args()))
        .await
        .expect_err("missing secret");

    assert!(matches!(err, CliError::MissingSecret));
}

#[tokio::test]
async fn trigger_surfaces_rejections() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/revalidate");
            then.status(401).json_body(json!({ "error": "Invalid signature" }));
        })
        .await;

    let err = ctx(&server)
        .trigger(&notification_from_args(trigger_args()))
        .await
        .expect_err("rejected");

    match err {
        CliError::Server(message) => assert!(message.contains("Invalid signature")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn health_decodes_unhealthy_snapshot() {
    let server = MockServer::start_async().await;
    let breaker = json!({
        "status": "unhealthy",
        "state": "OPEN",
        "failureCount": 5,
        "successCount": 0,
    });
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/health");
            then.status(503).json_body(json!({
                "status": "unhealthy",
                "services": {
                    "webhookBreaker": breaker,
                    "revalidationBreaker": breaker,
                    "contentStore": { "status": "healthy" },
                    "queue": { "status": "healthy", "pending": 0, "processing": false },
                },
                "metrics": {
                    "uptimeSeconds": 42,
                    "lastContentUpdate": null,
                    "totalRequests": 7,
                },
                "timestamp": "2024-05-01T10:00:00Z",
            }));
        })
        .await;

    let reply = ctx(&server).health().await.expect("health");

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body.status, HealthStatus::Unhealthy);
    assert_eq!(reply.body.metrics.total_requests, 7);
}

#[tokio::test]
async fn reset_metrics_sends_admin_token() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/health")
                .header("authorization", "Bearer admin-token")
                .json_body(json!({ "action": "reset-metrics" }));
            then.status(200).json_body(json!({
                "message": "Metrics reset successfully",
                "timestamp": "2024-05-01T10:00:00Z",
            }));
        })
        .await;

    let response = ctx(&server)
        .with_admin_token(Some("admin-token".to_string()))
        .reset_metrics()
        .await
        .expect("reset");

    mock.assert_async().await;
    assert_eq!(response.message, "Metrics reset successfully");
}
