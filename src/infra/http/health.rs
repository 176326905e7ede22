use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use revalidator_api_types::{
    AdminActionRequest, AdminActionResponse, HealthStatus, RESET_METRICS_ACTION,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::application::logger::SecurityEvent;

use super::AdminState;
use super::client::client_id;
use super::error::ApiError;

const SOURCE: &str = "infra::http::health";

pub(super) async fn health_report(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    let client = client_id(&headers);
    if let Err(err) = admit(&state, &client) {
        return err.into_response();
    }

    let report = state.health.report().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report)).into_response()
}

pub(super) async fn health_action(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = client_id(&headers);
    if let Err(err) = admit(&state, &client) {
        return err.into_response();
    }

    if let Some(expected) = state.admin_token.as_deref()
        && !bearer_matches(&headers, expected)
    {
        state
            .logger
            .security_event(SecurityEvent::UnauthorizedAdminAction, &client, None);
        return ApiError::unauthorized(SOURCE)
            .with_diagnostic("missing or invalid admin token")
            .into_response();
    }

    let request: AdminActionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::bad_request(SOURCE, "Invalid request")
                .with_details(vec![format!("Invalid JSON: {err}")])
                .into_response();
        }
    };

    if request.action != RESET_METRICS_ACTION {
        return ApiError::bad_request(SOURCE, "Invalid action")
            .with_details(vec![format!(
                "Unsupported action `{}`; expected `{RESET_METRICS_ACTION}`",
                request.action
            )])
            .into_response();
    }

    state.health.reset();
    Json(AdminActionResponse {
        message: "Metrics reset successfully".to_string(),
        timestamp: OffsetDateTime::now_utc(),
    })
    .into_response()
}

fn admit(state: &AdminState, client: &str) -> Result<(), ApiError> {
    let decision = state.health_limiter.check_limit(client);
    if decision.allowed {
        return Ok(());
    }
    state.logger.security_event(
        SecurityEvent::RateLimitExceeded,
        client,
        Some(json!({
            "limiter": state.health_limiter.name(),
            "totalHits": decision.total_hits,
        })),
    );
    Err(ApiError::rate_limited(SOURCE, decision.retry_after_secs()))
}

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(provided) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        return false;
    };
    provided.trim().as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_token_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert!(!bearer_matches(&headers, "token"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"));
        assert!(bearer_matches(&headers, "token"));
        assert!(!bearer_matches(&headers, "token2"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic token"));
        assert!(!bearer_matches(&headers, "token"));
    }
}
