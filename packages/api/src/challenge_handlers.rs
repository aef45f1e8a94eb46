// ABOUTME: HTTP request handlers for browsing the challenge catalog
// ABOUTME: Listing and detail views; reference solutions never leave the server

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use patchbox_challenges::{Challenge, Difficulty};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Catalog listing entry
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSummary {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub summary: String,
}

/// Full challenge view. Carries everything a client needs to present and
/// attempt the challenge; `solution_code` and `debrief` stay server-side.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDetail {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub summary: String,
    pub description: String,
    pub broken_code: String,
    pub test_code: String,
    pub success_message: String,
}

impl From<Challenge> for ChallengeSummary {
    fn from(challenge: Challenge) -> Self {
        Self {
            id: challenge.id,
            title: challenge.title,
            difficulty: challenge.difficulty,
            summary: challenge.summary,
        }
    }
}

impl From<Challenge> for ChallengeDetail {
    fn from(challenge: Challenge) -> Self {
        Self {
            id: challenge.id,
            title: challenge.title,
            difficulty: challenge.difficulty,
            summary: challenge.summary,
            description: challenge.description,
            broken_code: challenge.broken_code,
            test_code: challenge.test_code,
            success_message: challenge.success_message,
        }
    }
}

/// List all challenges
///
/// GET /api/challenges
pub async fn list_challenges(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ChallengeSummary>>> {
    let challenges = state.challenges.list().await?;
    info!("Listing {} challenges", challenges.len());

    Ok(Json(
        challenges.into_iter().map(ChallengeSummary::from).collect(),
    ))
}

/// Get one challenge
///
/// GET /api/challenges/{id}
pub async fn get_challenge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChallengeDetail>> {
    info!("Fetching challenge: {}", id);

    let challenge = state
        .challenges
        .get(&id)
        .await?
        .ok_or(ApiError::ChallengeNotFound(id))?;

    Ok(Json(ChallengeDetail::from(challenge)))
}
