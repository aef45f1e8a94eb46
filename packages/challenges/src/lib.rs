// ABOUTME: Challenge catalog package for Patchbox
// ABOUTME: Exposes the challenge model, the store seam and the bundled and SQLite-backed stores

pub mod catalog;
pub mod error;
pub mod sqlite;
pub mod types;

pub use catalog::CatalogStore;
pub use error::{ChallengeError, Result};
pub use sqlite::SqliteChallengeStore;
pub use types::{Challenge, ChallengeStore, Difficulty};
