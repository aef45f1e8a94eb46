// ABOUTME: HTTP request handler for code submissions
// ABOUTME: Admits through rate limit and idempotency checks, then streams the sandbox run as chunked text

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use patchbox_engine::{StreamEmitter, SubmissionJob};
use patchbox_quota::Admission;

use crate::error::{apply_rate_limit_headers, ApiError, ApiResult};
use crate::identity::Caller;
use crate::AppState;

/// Backpressure bound between the orchestrator and the response body.
const STREAM_BUFFER: usize = 64;

/// Request to run a candidate fix against a challenge. The required fields
/// are checked in the handler so an incomplete body gets a 400 with the
/// usual error envelope rather than an extractor rejection.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub challenge_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    /// Sandbox from the caller's previous attempt, reused when still alive.
    #[serde(default, rename = "sandboxID")]
    pub sandbox_id: Option<String>,
    /// Client-generated token guarding against double-submission. Callers
    /// that omit it accept the duplicate-execution risk.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Run a submission and stream its output
///
/// POST /api/submit
///
/// The response is chunked `text/plain`: test output as it happens, then a
/// single `__JSON_RESULT__:`-delimited terminal result line.
pub async fn submit(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<Response> {
    // Admission order is quota first: a rate-limited retry must be
    // side-effect free, so it may not touch the idempotency store.
    let decision = state.limiter.check(&identity).await;
    if !decision.allowed {
        return Err(ApiError::RateLimited { decision });
    }

    let challenge_id = request
        .challenge_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::validation("challengeId is required"))?;
    // The submitted code is staged verbatim; the trim is only a blank check.
    let code = request
        .code
        .as_deref()
        .filter(|code| !code.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::validation("code must not be empty"))?;

    info!(
        "Submission received for challenge {} from {}",
        challenge_id, identity
    );

    let challenge = state
        .challenges
        .get(challenge_id)
        .await?
        .ok_or_else(|| ApiError::ChallengeNotFound(challenge_id.to_string()))?;

    // No key means no guard: the caller accepts duplicate-execution risk.
    let submission_key = request
        .idempotency_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    if let Some(key) = &submission_key {
        match state.guard.begin(key).await {
            Admission::Claimed => {}
            Admission::Duplicate { existing_status } => {
                return Err(ApiError::DuplicateSubmission { existing_status });
            }
        }
    }

    let job = SubmissionJob {
        submission_id: Uuid::new_v4().to_string(),
        code,
        challenge,
        prior_sandbox_id: request.sandbox_id,
    };

    let (tx, rx) = mpsc::channel::<String>(STREAM_BUFFER);
    let orchestrator = state.orchestrator.clone();
    let guard = state.guard.clone();
    tokio::spawn(async move {
        // The run owns the key until it reaches a terminal state. A client
        // disconnect cancels the run but still releases the claim here.
        let record = orchestrator.run(job, StreamEmitter::new(tx)).await;
        debug!("Submission run finished: {}", record.outcome.as_str());
        if let Some(key) = submission_key {
            guard.finish(&key).await;
        }
    });

    let chunks =
        ReceiverStream::new(rx).map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk)));
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(chunks),
    )
        .into_response();
    apply_rate_limit_headers(response.headers_mut(), &decision);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use crate::create_api_router;
    use crate::test_support::{
        body_text, json_request, keyed_submit_request, submit_request, test_state, StubProvider,
    };
    use axum::http::StatusCode;
    use patchbox_engine::{decode_stream, RESULT_DELIMITER};
    use patchbox_quota::QuotaPolicy;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn submit_streams_output_then_a_result_frame() {
        let app = create_api_router(test_state(QuotaPolicy::default(), StubProvider::passing()));

        let response = app
            .oneshot(submit_request(
                "ai-cost-cache-002",
                "def estimate_cost(tokens): return tokens * 0.002",
                "198.51.100.1",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("X-RateLimit-Limit").unwrap(),
            "5"
        );
        assert_eq!(
            response.headers().get("X-RateLimit-Remaining").unwrap(),
            "4"
        );
        assert!(response.headers().contains_key("X-RateLimit-Reset"));

        let decoded = decode_stream(&body_text(response).await);
        assert!(decoded.display.starts_with("Running tests...\n\n"));
        assert!(decoded.display.contains("1 passed"));
        assert_eq!(decoded.result.map(|r| (r.success, r.sandbox_id)), Some((true, "sbx-api".to_string())));
    }

    #[tokio::test]
    async fn unknown_challenge_returns_404() {
        let app = create_api_router(test_state(QuotaPolicy::default(), StubProvider::passing()));

        let response = app
            .oneshot(submit_request("ghost-999", "def fix(): pass", "198.51.100.2"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "CHALLENGE_NOT_FOUND");
    }

    #[tokio::test]
    async fn missing_challenge_id_is_rejected() {
        let app = create_api_router(test_state(QuotaPolicy::default(), StubProvider::passing()));

        let payload = serde_json::json!({ "code": "def fix(): pass" });
        let response = app
            .oneshot(json_request(payload, "198.51.100.3"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn blank_code_is_rejected() {
        let app = create_api_router(test_state(QuotaPolicy::default(), StubProvider::passing()));

        let response = app
            .oneshot(submit_request("retry-storm-001", "   \n", "198.51.100.3"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn exhausted_quota_returns_429_with_headers() {
        let policy = QuotaPolicy {
            limit: 1,
            window: Duration::from_secs(600),
        };
        let app = create_api_router(test_state(policy, StubProvider::passing()));

        let first = app
            .clone()
            .oneshot(submit_request("retry-storm-001", "def fix(): pass", "198.51.100.4"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        // Drain the stream so the run finishes and releases its claim.
        let _ = body_text(first).await;

        let second = app
            .oneshot(submit_request("retry-storm-001", "def fix(): pass", "198.51.100.4"))
            .await
            .unwrap();

        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            second.headers().get("X-RateLimit-Remaining").unwrap(),
            "0"
        );
        assert!(second.headers().contains_key("Retry-After"));
        let body: serde_json::Value =
            serde_json::from_str(&body_text(second).await).unwrap();
        assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_conflicts_while_in_flight() {
        let app = create_api_router(test_state(
            QuotaPolicy::default(),
            StubProvider::slow(Duration::from_millis(300)),
        ));

        let first = app
            .clone()
            .oneshot(keyed_submit_request(
                "retry-storm-001",
                "def fix(): pass",
                "198.51.100.5",
                "run-42",
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        // The first run is still waiting on its sandbox, so the key is held.
        let second = app
            .oneshot(keyed_submit_request(
                "retry-storm-001",
                "def fix(): pass",
                "198.51.100.5",
                "run-42",
            ))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(second).await).unwrap();
        assert_eq!(body["error"]["code"], "SUBMISSION_IN_FLIGHT");
        assert_eq!(body["error"]["status"], "pending");

        // The first stream still completes normally.
        let decoded = decode_stream(&body_text(first).await);
        assert_eq!(decoded.result.map(|r| r.success), Some(true));
    }

    #[tokio::test]
    async fn finished_run_frees_its_idempotency_key() {
        let app = create_api_router(test_state(QuotaPolicy::default(), StubProvider::passing()));

        let first = app
            .clone()
            .oneshot(keyed_submit_request(
                "retry-storm-001",
                "def fix(): pass",
                "198.51.100.6",
                "run-42",
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        // Draining the stream means the run reached a terminal state.
        assert!(body_text(first).await.contains(RESULT_DELIMITER));

        let second = app
            .oneshot(keyed_submit_request(
                "retry-storm-001",
                "def fix(): pass",
                "198.51.100.6",
                "run-42",
            ))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let app = create_api_router(test_state(
            QuotaPolicy::default(),
            StubProvider::slow(Duration::from_millis(300)),
        ));

        let first = app
            .clone()
            .oneshot(keyed_submit_request(
                "retry-storm-001",
                "def fix(): pass",
                "198.51.100.7",
                "run-1",
            ))
            .await
            .unwrap();
        let second = app
            .oneshot(keyed_submit_request(
                "ai-cost-cache-002",
                "def fix(): pass",
                "198.51.100.7",
                "run-2",
            ))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert!(body_text(first).await.contains(RESULT_DELIMITER));
        assert!(body_text(second).await.contains(RESULT_DELIMITER));
    }

    #[tokio::test]
    async fn missing_key_bypasses_the_guard() {
        let app = create_api_router(test_state(
            QuotaPolicy::default(),
            StubProvider::slow(Duration::from_millis(300)),
        ));

        // Identical requests, no idempotency key: both are admitted.
        let first = app
            .clone()
            .oneshot(submit_request("retry-storm-001", "def fix(): pass", "198.51.100.8"))
            .await
            .unwrap();
        let second = app
            .oneshot(submit_request("retry-storm-001", "def fix(): pass", "198.51.100.8"))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
    }
}
