// ABOUTME: Tunable settings for the submission engine
// ABOUTME: File names, commands and timeouts applied to every sandbox run

use std::time::Duration;

/// How a submission is laid out and executed inside a sandbox.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path the submitted code is written to.
    pub solution_path: String,
    /// Path the challenge's test file is written to.
    pub test_path: String,
    /// Command that runs the tests against the staged solution.
    pub run_command: String,
    /// Idle timeout requested for freshly created sandboxes.
    pub sandbox_idle_timeout: Duration,
    /// Wall-clock budget for the test run.
    pub run_timeout: Duration,
    /// Budget for a challenge's setup command during staging.
    pub setup_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            solution_path: "solution.py".to_string(),
            test_path: "test_main.py".to_string(),
            run_command: "pytest -s test_main.py".to_string(),
            sandbox_idle_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(15),
            setup_timeout: Duration::from_secs(60),
        }
    }
}
