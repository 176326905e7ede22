mod support;

use std::collections::HashSet;

use axum::http::StatusCode;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use tower::ServiceExt;

use support::{HarnessOptions, harness, signed_request};

#[tokio::test]
async fn webhook_flow_emits_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let harness = harness(HarnessOptions {
        webhook_limit: 1,
        ..HarnessOptions::default()
    });
    harness.invalidator.fail_always("/");

    let payload = json!({
        "documentType": "gallery",
        "documentId": "g-1",
        "slug": { "current": "spring" },
    });
    let first = harness
        .router
        .clone()
        .oneshot(signed_request(&payload, "10.9.9.9"))
        .await
        .expect("router should respond");
    assert_eq!(first.status(), StatusCode::MULTI_STATUS);

    let limited = harness
        .router
        .clone()
        .oneshot(signed_request(&payload, "10.9.9.9"))
        .await
        .expect("router should respond");
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "revalidator_webhook_requests_total",
        "revalidator_invalidations_total",
        "revalidator_rate_limit_denied_total",
        "revalidator_operation_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
