// ABOUTME: Challenge data model and the store seam used by the submission pipeline
// ABOUTME: Challenges carry broken code, a verification script and presentation copy

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ChallengeError, Result};

/// A debugging challenge: code with a planted defect plus the test script
/// that exposes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    /// One-line teaser shown in listings.
    pub summary: String,
    /// Full incident write-up shown on the challenge page.
    pub description: String,
    /// The defective source the user starts from and edits.
    pub broken_code: String,
    /// Verification script executed against the user's submission.
    pub test_code: String,
    /// Shown to the user when the verification script passes.
    pub success_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debrief: Option<String>,
    /// Optional shell command run in the sandbox before the tests,
    /// outside the timed window. Used for dependency installs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(ChallengeError::UnknownDifficulty(other.to_string())),
        }
    }
}

/// Lookup seam between the HTTP layer and wherever challenges live.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Fetch a single challenge. `None` means the id does not exist
    /// anywhere the store can see.
    async fn get(&self, id: &str) -> Result<Option<Challenge>>;

    /// All challenges visible through this store, catalog order.
    async fn list(&self) -> Result<Vec<Challenge>>;
}
