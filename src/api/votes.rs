use crate::api::middleware::{MaybeAuth, RequireAuth};
use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::models::{BallotStatus, CastVoteRequest, VoteOutcome};
use crate::week;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserVoteQuery {
    track_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UserVote {
    value: i32,
}

pub fn vote_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vote", get(get_vote).post(cast_vote))
        .route("/vote/ballot", get(ballot))
}

fn parse_track_id(raw: Option<&str>) -> Result<Uuid> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Track ID is required".to_string()))?;

    Uuid::parse_str(raw).map_err(|_| AppError::InvalidInput("Track not found".to_string()))
}

async fn cast_vote(
    State(state): State<Arc<AppState>>,
    MaybeAuth(claims): MaybeAuth,
    body: std::result::Result<Json<CastVoteRequest>, JsonRejection>,
) -> Result<Json<VoteOutcome>> {
    // Auth, then the Sunday lock, then the body
    let Some(claims) = claims else {
        return Err(AppError::Unauthorized);
    };
    if week::is_voting_locked(&state.clock.now()) {
        return Err(AppError::VotingLocked);
    }

    let Json(req) = body.map_err(|rejection| {
        tracing::debug!("Rejected vote body: {}", rejection);
        AppError::InvalidInput("Invalid request".to_string())
    })?;

    let track_id = parse_track_id(req.track_id.as_deref())?;
    let value = req
        .value
        .ok_or_else(|| AppError::InvalidInput("Vote value must be 1 or -1".to_string()))?;

    let outcome = state
        .ledger
        .cast_vote(track_id, Some(claims.sub.as_str()), value)
        .await?;
    Ok(Json(outcome))
}

async fn get_vote(
    State(state): State<Arc<AppState>>,
    MaybeAuth(claims): MaybeAuth,
    Query(query): Query<UserVoteQuery>,
) -> Result<Json<UserVote>> {
    let Some(claims) = claims else {
        return Ok(Json(UserVote { value: 0 }));
    };

    let track_id = parse_track_id(query.track_id.as_deref())?;
    let value = state
        .ledger
        .get_user_vote(track_id, Some(claims.sub.as_str()))
        .await?;

    Ok(Json(UserVote { value }))
}

async fn ballot(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
) -> Result<Json<BallotStatus>> {
    Ok(Json(state.ledger.ballot(&claims.sub).await?))
}
