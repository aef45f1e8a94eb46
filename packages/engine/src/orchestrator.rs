// ABOUTME: Submission run state machine, from admission through the terminal result frame
// ABOUTME: Drives sandbox acquisition, file staging and test execution, streaming output as it arrives

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout_at;
use tracing::{debug, error, info, warn};

use patchbox_challenges::Challenge;
use patchbox_sandbox::{
    CommandStream, CreateOptions, ExecEvent, RunOptions, SandboxProvider, SandboxSession,
};

use crate::config::EngineConfig;
use crate::emitter::StreamEmitter;
use crate::framing::SubmissionResult;

/// Extra wall-clock slack past the provider-side kill timeout, so a healthy
/// provider gets to report the kill itself before we give up on the stream.
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Tests ran and exited cleanly.
    Passed,
    /// Tests ran and failed, or the run timed out.
    Failed,
    /// Infrastructure gave out before the tests could decide anything.
    Error,
    /// The consumer disconnected mid-run.
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Passed => "passed",
            RunOutcome::Failed => "failed",
            RunOutcome::Error => "error",
            RunOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Passed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One submission to run: the user's code, the challenge it targets and an
/// optional sandbox id from their previous attempt.
#[derive(Debug, Clone)]
pub struct SubmissionJob {
    pub submission_id: String,
    pub code: String,
    pub challenge: Challenge,
    pub prior_sandbox_id: Option<String>,
}

/// What the run produced, for logging and bookkeeping after the stream has
/// already told the client everything it needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub outcome: RunOutcome,
    pub sandbox_id: Option<String>,
}

// Run phases. Each is consumed by the transition out of it, so a run can
// never revisit a phase or finish twice.
struct Admitted {
    job: SubmissionJob,
}

struct SandboxReady {
    job: SubmissionJob,
    session: SandboxSession,
}

struct FilesStaged {
    job: SubmissionJob,
    session: SandboxSession,
}

struct Running {
    job: SubmissionJob,
    session: SandboxSession,
    stream: CommandStream,
}

struct Terminal {
    outcome: RunOutcome,
    sandbox_id: Option<String>,
    /// Text appended to the stream before the result frame. Infra errors
    /// carry their explanation here.
    note: Option<String>,
}

impl Terminal {
    fn passed(sandbox_id: String) -> Self {
        Self {
            outcome: RunOutcome::Passed,
            sandbox_id: Some(sandbox_id),
            note: None,
        }
    }

    fn failed(sandbox_id: String) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            sandbox_id: Some(sandbox_id),
            note: None,
        }
    }

    fn timed_out(sandbox_id: String, budget: Duration) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            sandbox_id: Some(sandbox_id),
            note: Some(format!(
                "\nTest run timed out after {}s.\n",
                budget.as_secs()
            )),
        }
    }

    fn error(sandbox_id: Option<String>, message: &str) -> Self {
        Self {
            outcome: RunOutcome::Error,
            sandbox_id,
            note: Some(format!("\nCritical Error: {}\n", message)),
        }
    }

    fn cancelled(sandbox_id: String) -> Self {
        Self {
            outcome: RunOutcome::Cancelled,
            sandbox_id: Some(sandbox_id),
            note: None,
        }
    }
}

/// Runs submissions against a sandbox provider. Every run emits its output
/// through the caller's emitter and, unless the consumer disconnects first,
/// ends with exactly one result frame.
pub struct Orchestrator {
    provider: Arc<dyn SandboxProvider>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    /// Drives one submission to its terminal state. Never fails from the
    /// caller's perspective; every fate is reported in the returned record
    /// and, for non-cancelled runs, framed into the stream.
    pub async fn run(&self, job: SubmissionJob, emitter: StreamEmitter) -> RunRecord {
        let submission_id = job.submission_id.clone();
        info!(
            "Submission {} admitted for challenge {}",
            submission_id, job.challenge.id
        );

        let terminal = self.drive(Admitted { job }, &emitter).await;
        self.finish(&submission_id, terminal, &emitter).await
    }

    async fn drive(&self, admitted: Admitted, emitter: &StreamEmitter) -> Terminal {
        let ready = match self.acquire_sandbox(admitted).await {
            Ok(state) => state,
            Err(terminal) => return terminal,
        };

        let staged = match self.stage_files(ready).await {
            Ok(state) => state,
            Err(terminal) => return terminal,
        };

        let running = match self.launch(staged, emitter).await {
            Ok(state) => state,
            Err(terminal) => return terminal,
        };

        self.supervise(running, emitter).await
    }

    // ==================== Phase Transitions ====================

    async fn acquire_sandbox(&self, state: Admitted) -> Result<SandboxReady, Terminal> {
        let Admitted { job } = state;

        if let Some(prior) = job.prior_sandbox_id.clone() {
            if let Some(session) = self.try_reconnect(&prior).await {
                info!("Submission {} reusing sandbox {}", job.submission_id, session.id);
                return Ok(SandboxReady { job, session });
            }
        }

        let options = CreateOptions {
            idle_timeout: self.config.sandbox_idle_timeout,
        };
        match self.provider.create(options).await {
            Ok(session) => {
                info!(
                    "Submission {} provisioned sandbox {}",
                    job.submission_id, session.id
                );
                Ok(SandboxReady { job, session })
            }
            Err(e) => {
                error!(
                    "Submission {} failed to provision a sandbox: {}",
                    job.submission_id, e
                );
                Err(Terminal::error(None, "Failed to provision a sandbox"))
            }
        }
    }

    async fn stage_files(&self, state: SandboxReady) -> Result<FilesStaged, Terminal> {
        let SandboxReady { job, session } = state;

        let files = [
            (self.config.solution_path.as_str(), job.code.as_str()),
            (self.config.test_path.as_str(), job.challenge.test_code.as_str()),
        ];
        for (path, content) in files {
            if let Err(e) = self.provider.write_file(&session, path, content).await {
                error!(
                    "Submission {} failed to stage {}: {}",
                    job.submission_id, path, e
                );
                return Err(Terminal::error(
                    Some(session.id),
                    "Failed to stage submission files",
                ));
            }
        }

        if let Some(setup) = job.challenge.setup_command.clone() {
            info!(
                "Submission {} running setup command in sandbox {}",
                job.submission_id, session.id
            );
            if let Err(reason) = self.run_setup(&session, &setup).await {
                error!(
                    "Submission {} setup command failed: {}",
                    job.submission_id, reason
                );
                return Err(Terminal::error(Some(session.id), "Challenge setup failed"));
            }
        }

        Ok(FilesStaged { job, session })
    }

    async fn launch(
        &self,
        state: FilesStaged,
        emitter: &StreamEmitter,
    ) -> Result<Running, Terminal> {
        let FilesStaged { job, session } = state;

        if emitter.text("Running tests...\n\n").await.is_err() {
            info!(
                "Submission {} consumer disconnected before launch",
                job.submission_id
            );
            return Err(Terminal::cancelled(session.id));
        }

        let options = RunOptions {
            timeout: self.config.run_timeout,
        };
        match self
            .provider
            .run_command(&session, &self.config.run_command, options)
            .await
        {
            Ok(stream) => {
                info!(
                    "Submission {} running tests in sandbox {}",
                    job.submission_id, session.id
                );
                Ok(Running { job, session, stream })
            }
            Err(e) => {
                error!("Submission {} failed to start tests: {}", job.submission_id, e);
                Err(Terminal::error(Some(session.id), "Failed to start the test run"))
            }
        }
    }

    async fn supervise(&self, state: Running, emitter: &StreamEmitter) -> Terminal {
        let Running {
            job,
            session,
            mut stream,
        } = state;

        let deadline = tokio::time::Instant::now() + self.config.run_timeout + TIMEOUT_GRACE;
        loop {
            match timeout_at(deadline, stream.receiver.recv()).await {
                Err(_) => {
                    // Dropping the stream stops its reader; the sandbox
                    // idle timeout reclaims whatever is still running.
                    warn!(
                        "Submission {} timed out after {}s",
                        job.submission_id,
                        self.config.run_timeout.as_secs()
                    );
                    return Terminal::timed_out(session.id, self.config.run_timeout);
                }
                Ok(None) => {
                    error!(
                        "Submission {} output stream closed without an exit status",
                        job.submission_id
                    );
                    return Terminal::error(
                        Some(session.id),
                        "Test run ended without reporting an exit status",
                    );
                }
                Ok(Some(ExecEvent::Stdout(chunk))) | Ok(Some(ExecEvent::Stderr(chunk))) => {
                    if emitter.text(chunk).await.is_err() {
                        info!(
                            "Submission {} consumer disconnected, cancelling run",
                            job.submission_id
                        );
                        return Terminal::cancelled(session.id);
                    }
                }
                Ok(Some(ExecEvent::Exited { exit_code })) => {
                    info!(
                        "Submission {} tests exited with status {}",
                        job.submission_id, exit_code
                    );
                    return if exit_code == 0 {
                        Terminal::passed(session.id)
                    } else {
                        Terminal::failed(session.id)
                    };
                }
            }
        }
    }

    async fn finish(
        &self,
        submission_id: &str,
        terminal: Terminal,
        emitter: &StreamEmitter,
    ) -> RunRecord {
        let record = RunRecord {
            outcome: terminal.outcome,
            sandbox_id: terminal.sandbox_id.clone(),
        };

        // A cancelled run has no consumer left; everyone else gets any
        // pending note plus exactly one result frame.
        if terminal.outcome != RunOutcome::Cancelled {
            if let Some(note) = terminal.note {
                let _ = emitter.text(note).await;
            }
            let result = SubmissionResult {
                success: terminal.outcome.is_success(),
                sandbox_id: terminal.sandbox_id.unwrap_or_default(),
            };
            if emitter.result(&result).await.is_err() {
                debug!(
                    "Submission {} result frame dropped, consumer already gone",
                    submission_id
                );
            }
        }

        info!(
            "Submission {} finished: {}",
            submission_id,
            record.outcome.as_str()
        );
        record
    }

    // ==================== Private Helper Methods ====================

    async fn try_reconnect(&self, sandbox_id: &str) -> Option<SandboxSession> {
        match self.provider.connect(sandbox_id).await {
            Ok(session) => Some(session),
            Err(e) => {
                debug!(
                    "Reconnect to sandbox {} failed, falling back to a fresh one: {}",
                    sandbox_id, e
                );
                None
            }
        }
    }

    /// Runs a challenge's setup command to completion, discarding output.
    /// Any failure is described in the returned string.
    async fn run_setup(&self, session: &SandboxSession, command: &str) -> Result<(), String> {
        let options = RunOptions {
            timeout: self.config.setup_timeout,
        };
        let mut stream = self
            .provider
            .run_command(session, command, options)
            .await
            .map_err(|e| e.to_string())?;

        let deadline = tokio::time::Instant::now() + self.config.setup_timeout + TIMEOUT_GRACE;
        loop {
            match timeout_at(deadline, stream.receiver.recv()).await {
                Err(_) => {
                    return Err(format!(
                        "setup command timed out after {}s",
                        self.config.setup_timeout.as_secs()
                    ));
                }
                Ok(None) => {
                    return Err("setup command ended without an exit status".to_string());
                }
                Ok(Some(ExecEvent::Stdout(line))) | Ok(Some(ExecEvent::Stderr(line))) => {
                    debug!("setup: {}", line.trim_end());
                }
                Ok(Some(ExecEvent::Exited { exit_code: 0 })) => return Ok(()),
                Ok(Some(ExecEvent::Exited { exit_code })) => {
                    return Err(format!("setup command exited with status {}", exit_code));
                }
            }
        }
    }
}
