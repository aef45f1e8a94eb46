// ABOUTME: HTTP client for the remote sandbox service
// ABOUTME: Command output arrives as newline-delimited JSON and is relayed through a bounded channel

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::provider::{
    CommandStream, CreateOptions, ExecEvent, Result, RunOptions, SandboxError, SandboxProvider,
    SandboxSession,
};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 64;

/// Client for a remote sandbox service exposing create/connect/write/exec
/// over HTTPS. Exec responses are chunked NDJSON relayed into an event
/// channel as lines complete.
#[derive(Clone)]
pub struct HttpSandboxProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEnvelope {
    sandbox_id: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecLine {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    exit_code: Option<i64>,
}

impl HttpSandboxProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        // No overall timeout on the client: exec responses stream for as
        // long as the command runs. Connect timeout still bounds dials.
        let client = Client::builder()
            .connect_timeout(CONTROL_TIMEOUT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn session_from(&self, envelope: SessionEnvelope) -> SandboxSession {
        SandboxSession {
            id: envelope.sandbox_id,
            created_at: envelope.created_at.unwrap_or_else(Utc::now),
        }
    }
}

fn parse_exec_line(line: &str) -> Option<ExecEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parsed: ExecLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Skipping malformed exec line: {}", e);
            return None;
        }
    };

    if let Some(exit_code) = parsed.exit_code {
        return Some(ExecEvent::Exited { exit_code });
    }

    match (parsed.stream.as_deref(), parsed.data) {
        (Some("stdout"), Some(data)) => Some(ExecEvent::Stdout(data)),
        (Some("stderr"), Some(data)) => Some(ExecEvent::Stderr(data)),
        _ => {
            debug!("Skipping exec line with no recognized payload");
            None
        }
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    async fn connect(&self, sandbox_id: &str) -> Result<SandboxSession> {
        let url = format!("{}/v1/sandboxes/{}/connect", self.base_url, sandbox_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(SandboxError::NotFound(sandbox_id.to_string())),
            status if status.is_success() => {
                let envelope: SessionEnvelope = response
                    .json()
                    .await
                    .map_err(|e| SandboxError::Protocol(e.to_string()))?;
                Ok(self.session_from(envelope))
            }
            status => Err(SandboxError::Connection(format!(
                "Connect to {} returned {}",
                sandbox_id, status
            ))),
        }
    }

    async fn create(&self, options: CreateOptions) -> Result<SandboxSession> {
        let url = format!("{}/v1/sandboxes", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .timeout(CONTROL_TIMEOUT)
            .json(&json!({
                "idleTimeoutMs": options.idle_timeout.as_millis() as u64,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SandboxError::Connection(format!(
                "Create returned {}",
                response.status()
            )));
        }

        let envelope: SessionEnvelope = response
            .json()
            .await
            .map_err(|e| SandboxError::Protocol(e.to_string()))?;
        Ok(self.session_from(envelope))
    }

    async fn write_file(&self, session: &SandboxSession, path: &str, content: &str) -> Result<()> {
        let url = format!("{}/v1/sandboxes/{}/files", self.base_url, session.id);
        let response = self
            .client
            .put(&url)
            .header("Authorization", self.auth_header())
            .timeout(CONTROL_TIMEOUT)
            .query(&[("path", path)])
            .body(content.to_string())
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(SandboxError::NotFound(session.id.clone())),
            status if status.is_success() => Ok(()),
            status => Err(SandboxError::WriteFailed(format!(
                "Write of {} returned {}",
                path, status
            ))),
        }
    }

    async fn run_command(
        &self,
        session: &SandboxSession,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandStream> {
        let url = format!("{}/v1/sandboxes/{}/exec", self.base_url, session.id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&json!({
                "command": command,
                "timeoutMs": options.timeout.as_millis() as u64,
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(SandboxError::NotFound(session.id.clone())),
            status if status.is_success() => {}
            status => {
                return Err(SandboxError::ExecFailed(format!(
                    "Exec returned {}",
                    status
                )))
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        // Channel closes without an Exited event; the
                        // consumer treats that as an unknown outcome.
                        debug!("Exec stream broke mid-flight: {}", e);
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let Some(event) = parse_exec_line(&String::from_utf8_lossy(&line)) else {
                        continue;
                    };
                    let finished = matches!(event, ExecEvent::Exited { .. });
                    if tx.send(event).await.is_err() || finished {
                        return;
                    }
                }
            }

            // Flush a final line the server did not terminate.
            if let Some(event) = parse_exec_line(&String::from_utf8_lossy(&buffer)) {
                let _ = tx.send(event).await;
            }
        });

        Ok(CommandStream { receiver: rx })
    }
}
