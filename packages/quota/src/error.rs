// ABOUTME: Error types for quota store operations
// ABOUTME: Distinguishes transport failures from store-side command and protocol errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Unexpected store response: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, QuotaError>;
