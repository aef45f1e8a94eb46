// ABOUTME: Shared quota and idempotency store speaking the Redis-over-REST pipeline protocol
// ABOUTME: Sliding log as a sorted set per key; set-if-absent markers for idempotency claims

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{QuotaError, Result};
use crate::store::{IdempotencyStore, QuotaDecision, QuotaPolicy, QuotaStore, STATUS_PENDING};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for an Upstash-compatible Redis REST endpoint. One instance
/// serves both the rate limiter and the idempotency guard; commands are
/// batched through the `/pipeline` endpoint.
#[derive(Clone)]
pub struct RedisRestStore {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl RedisRestStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    async fn pipeline(&self, commands: &[Vec<String>]) -> Result<Vec<Value>> {
        let url = format!("{}/pipeline", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(commands)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QuotaError::Protocol(format!(
                "Store returned {}",
                response.status()
            )));
        }

        let replies: Vec<CommandReply> = response.json().await?;
        replies
            .into_iter()
            .map(|reply| match reply.error {
                Some(message) => Err(QuotaError::Command(message)),
                None => Ok(reply.result),
            })
            .collect()
    }
}

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn as_count(value: Option<&Value>) -> Result<i64> {
    value
        .and_then(Value::as_i64)
        .ok_or_else(|| QuotaError::Protocol(format!("Expected integer count, got {:?}", value)))
}

// ZRANGE ... WITHSCORES replies as ["member", "score"]; scores arrive as
// strings or numbers depending on the server.
fn oldest_score_ms(value: Option<&Value>) -> Option<i64> {
    let score = value?.as_array()?.get(1)?;
    match score {
        Value::String(s) => s.parse::<f64>().ok().map(|f| f as i64),
        Value::Number(n) => n.as_f64().map(|f| f as i64),
        _ => None,
    }
}

#[async_trait]
impl QuotaStore for RedisRestStore {
    async fn hit(&self, key: &str, policy: QuotaPolicy) -> Result<QuotaDecision> {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = policy.window.as_millis() as i64;
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let horizon = (now_ms - window_ms).to_string();

        let replies = self
            .pipeline(&[
                cmd(&["ZREMRANGEBYSCORE", key, "-inf", &horizon]),
                cmd(&["ZADD", key, &now_ms.to_string(), &member]),
                cmd(&["ZCARD", key]),
                cmd(&["ZRANGE", key, "0", "0", "WITHSCORES"]),
                cmd(&["PEXPIRE", key, &window_ms.to_string()]),
            ])
            .await?;

        // The count includes the hit recorded above, and any concurrent
        // hits that landed between our ZADD and ZCARD, so it can only
        // over-count. Over-admission is impossible.
        let count = as_count(replies.get(2))?;
        let allowed = count <= policy.limit as i64;
        if !allowed {
            // Un-record the losing hit so a denial does not extend the
            // lockout. Best-effort: a leftover member expires with the
            // window anyway.
            if let Err(e) = self.pipeline(&[cmd(&["ZREM", key, &member])]).await {
                debug!("Failed to roll back denied hit for {}: {}", key, e);
            }
        }

        let standing = if allowed { count } else { count - 1 };
        let reset_at = oldest_score_ms(replies.get(3))
            .and_then(|ms| Utc.timestamp_millis_opt(ms + window_ms).single())
            .unwrap_or_else(|| Utc::now() + chrono::Duration::milliseconds(window_ms));

        Ok(QuotaDecision {
            allowed,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(standing.max(0) as u32),
            reset_at,
        })
    }

    async fn peek(&self, key: &str, policy: QuotaPolicy) -> Result<QuotaDecision> {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = policy.window.as_millis() as i64;
        let horizon = (now_ms - window_ms).to_string();

        let replies = self
            .pipeline(&[
                cmd(&["ZREMRANGEBYSCORE", key, "-inf", &horizon]),
                cmd(&["ZCARD", key]),
                cmd(&["ZRANGE", key, "0", "0", "WITHSCORES"]),
            ])
            .await?;

        let count = as_count(replies.get(1))?;
        let reset_at = oldest_score_ms(replies.get(2))
            .and_then(|ms| Utc.timestamp_millis_opt(ms + window_ms).single())
            .unwrap_or_else(Utc::now);

        Ok(QuotaDecision {
            allowed: count < policy.limit as i64,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(count.max(0) as u32),
            reset_at,
        })
    }
}

#[async_trait]
impl IdempotencyStore for RedisRestStore {
    async fn put_if_absent(
        &self,
        key: &str,
        status: &str,
        ttl: Duration,
    ) -> Result<Option<String>> {
        let ttl_ms = ttl.as_millis().to_string();
        let replies = self
            .pipeline(&[
                cmd(&["SET", key, status, "NX", "PX", &ttl_ms]),
                cmd(&["GET", key]),
            ])
            .await?;

        let acquired = matches!(replies.first(), Some(Value::String(s)) if s == "OK");
        if acquired {
            return Ok(None);
        }

        // Holder may release between our SET and GET; report the claim
        // as pending rather than inventing a gap.
        let existing = replies
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or(STATUS_PENDING)
            .to_string();
        Ok(Some(existing))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.pipeline(&[cmd(&["DEL", key])]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy() -> QuotaPolicy {
        QuotaPolicy {
            limit: 5,
            window: Duration::from_secs(600),
        }
    }

    async fn store_for(server: &MockServer) -> RedisRestStore {
        RedisRestStore::new(server.uri(), "test-token").unwrap()
    }

    #[tokio::test]
    async fn hit_under_the_limit_is_allowed() {
        let server = MockServer::start().await;
        let now_ms = Utc::now().timestamp_millis();

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": 0},
                {"result": 1},
                {"result": 3},
                {"result": ["member", now_ms.to_string()]},
                {"result": 1}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let decision = store.hit("ratelimit:user:u-1", policy()).await.unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.remaining, 2);
        assert!(decision.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn hit_over_the_limit_is_denied_and_rolled_back() {
        let server = MockServer::start().await;
        let now_ms = Utc::now().timestamp_millis();

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .and(body_string_contains("ZREMRANGEBYSCORE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": 0},
                {"result": 1},
                {"result": 6},
                {"result": ["member", (now_ms - 1000).to_string()]},
                {"result": 1}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .and(body_string_contains("[[\"ZREM\","))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"result": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let decision = store.hit("ratelimit:ip:10.0.0.1", policy()).await.unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn command_error_surfaces_as_store_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"error": "WRONGTYPE Operation against a key holding the wrong kind of value"}
            ])))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let result = store.hit("ratelimit:user:u-1", policy()).await;
        assert!(matches!(result, Err(QuotaError::Command(_))));
    }

    #[tokio::test]
    async fn http_failure_surfaces_as_protocol_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let result = store.peek("ratelimit:user:u-1", policy()).await;
        assert!(matches!(result, Err(QuotaError::Protocol(_))));
    }

    #[tokio::test]
    async fn peek_reports_an_untouched_window() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": 0},
                {"result": 0},
                {"result": []}
            ])))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let decision = store.peek("ratelimit:user:u-1", policy()).await.unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
    }

    #[tokio::test]
    async fn claim_succeeds_when_the_key_is_free() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .and(body_string_contains("\"NX\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": "OK"},
                {"result": "pending"}
            ])))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let existing = store
            .put_if_absent("submission:key-1", "pending", Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(existing, None);
    }

    #[tokio::test]
    async fn claim_conflict_reports_the_holder_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/pipeline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": null},
                {"result": "pending"}
            ])))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let existing = store
            .put_if_absent("submission:key-1", "pending", Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(existing, Some("pending".to_string()));
    }
}
