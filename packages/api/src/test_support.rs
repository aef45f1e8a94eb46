// ABOUTME: Shared fixtures for handler tests
// ABOUTME: Scripted sandbox provider, ready-made app state and request builders

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use chrono::Utc;
use http_body_util::BodyExt;
use tokio::sync::mpsc;

use patchbox_challenges::{CatalogStore, ChallengeStore};
use patchbox_engine::{EngineConfig, Orchestrator};
use patchbox_quota::{
    IdempotencyGuard, MemoryIdempotencyStore, MemoryQuotaStore, QuotaPolicy, RateLimiter,
};
use patchbox_sandbox::{
    CommandStream, CreateOptions, ExecEvent, RunOptions, SandboxError, SandboxProvider,
    SandboxSession,
};

use crate::AppState;

/// Provider that replays the same event script for every run.
pub(crate) struct StubProvider {
    pub delay: Option<Duration>,
    pub events: Vec<ExecEvent>,
}

impl StubProvider {
    pub fn passing() -> Self {
        Self {
            delay: None,
            events: vec![
                ExecEvent::Stdout("1 passed\n".to_string()),
                ExecEvent::Exited { exit_code: 0 },
            ],
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::passing()
        }
    }
}

#[async_trait]
impl SandboxProvider for StubProvider {
    async fn connect(&self, sandbox_id: &str) -> patchbox_sandbox::Result<SandboxSession> {
        Err(SandboxError::NotFound(sandbox_id.to_string()))
    }

    async fn create(&self, _options: CreateOptions) -> patchbox_sandbox::Result<SandboxSession> {
        Ok(SandboxSession {
            id: "sbx-api".to_string(),
            created_at: Utc::now(),
        })
    }

    async fn write_file(
        &self,
        _session: &SandboxSession,
        _path: &str,
        _content: &str,
    ) -> patchbox_sandbox::Result<()> {
        Ok(())
    }

    async fn run_command(
        &self,
        _session: &SandboxSession,
        _command: &str,
        _options: RunOptions,
    ) -> patchbox_sandbox::Result<CommandStream> {
        let delay = self.delay;
        let events = self.events.clone();
        let (tx, receiver) = mpsc::channel(8);
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(CommandStream { receiver })
    }
}

/// App state backed by in-memory stores and the given provider.
pub(crate) fn test_state(policy: QuotaPolicy, provider: StubProvider) -> AppState {
    let challenges: Arc<dyn ChallengeStore> =
        Arc::new(CatalogStore::bundled().expect("bundled catalog parses"));
    AppState {
        challenges,
        limiter: Arc::new(RateLimiter::new(policy, Arc::new(MemoryQuotaStore::new()))),
        guard: Arc::new(IdempotencyGuard::new(
            Duration::from_secs(60),
            Arc::new(MemoryIdempotencyStore::new()),
        )),
        orchestrator: Arc::new(Orchestrator::new(
            Arc::new(provider),
            EngineConfig::default(),
        )),
    }
}

/// State whose runs pass instantly; for tests that only care about the API.
pub(crate) fn noop_state(policy: QuotaPolicy) -> AppState {
    test_state(policy, StubProvider::passing())
}

pub(crate) fn submit_request(challenge_id: &str, code: &str, ip: &str) -> Request<Body> {
    let payload = serde_json::json!({ "challengeId": challenge_id, "code": code });
    json_request(payload, ip)
}

pub(crate) fn keyed_submit_request(
    challenge_id: &str,
    code: &str,
    ip: &str,
    idempotency_key: &str,
) -> Request<Body> {
    let payload = serde_json::json!({
        "challengeId": challenge_id,
        "code": code,
        "idempotencyKey": idempotency_key,
    });
    json_request(payload, ip)
}

pub(crate) fn json_request(payload: serde_json::Value, ip: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/submit")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(payload.to_string()))
        .unwrap()
}

pub(crate) async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
