// ABOUTME: Provider trait and types for remote sandbox execution backends
// ABOUTME: Sessions are connect-or-create, files are staged by path, commands stream their output

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("File write failed: {0}")]
    WriteFailed(String),

    #[error("Command failed to start: {0}")]
    ExecFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Handle to one live sandbox. Sessions are never shared between two
/// in-flight submissions; reuse is strictly sequential.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Options for creating a fresh sandbox.
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Provider-side idle timeout. Keeps orphaned sandboxes reclaimable
    /// even if this process crashes before the run finishes.
    pub idle_timeout: Duration,
}

/// Options for running one command.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Provider-side kill timeout for the command itself.
    pub timeout: Duration,
}

/// One event from a running command. `Exited` is always the final event
/// of a well-formed stream; a stream that ends without it means the
/// command's fate is unknown.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    Stdout(String),
    Stderr(String),
    Exited { exit_code: i64 },
}

/// Ordered event stream from a running command.
pub struct CommandStream {
    pub receiver: mpsc::Receiver<ExecEvent>,
}

/// Contract with the remote sandboxing service. The orchestration layer
/// only ever talks to sandboxes through this seam.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Reattach to a live sandbox by id. Fails when the sandbox has
    /// expired or never existed.
    async fn connect(&self, sandbox_id: &str) -> Result<SandboxSession>;

    /// Create a fresh sandbox.
    async fn create(&self, options: CreateOptions) -> Result<SandboxSession>;

    /// Write one file into the sandbox filesystem, creating parents as
    /// needed.
    async fn write_file(&self, session: &SandboxSession, path: &str, content: &str) -> Result<()>;

    /// Start `command` inside the sandbox and stream its output as it
    /// is produced.
    async fn run_command(
        &self,
        session: &SandboxSession,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandStream>;
}
