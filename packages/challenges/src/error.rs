// ABOUTME: Error types for challenge catalog and storage operations
// ABOUTME: Covers catalog parsing, database access and difficulty decoding failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown difficulty: {0}")]
    UnknownDifficulty(String),
}

pub type Result<T> = std::result::Result<T, ChallengeError>;
