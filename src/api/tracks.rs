use crate::app::AppState;
use crate::error::Result;
use crate::models::{ArchiveWeek, RankedTrack};
use crate::week::{self, TimeRemaining};
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WeekStatus {
    week_start: NaiveDate,
    week_end: DateTime<FixedOffset>,
    locked: bool,
    time_until_lock_end: TimeRemaining,
    days_until_next_week: u32,
}

pub fn track_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracks", get(list_tracks))
        .route("/archive", get(archive))
        .route("/week", get(week_status))
}

async fn list_tracks(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RankedTrack>>> {
    Ok(Json(state.ledger.current_tally().await?))
}

async fn archive(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ArchiveWeek>>> {
    Ok(Json(state.ledger.archive().await?))
}

async fn week_status(State(state): State<Arc<AppState>>) -> Json<WeekStatus> {
    let now = state.clock.now();

    Json(WeekStatus {
        week_start: week::week_start_date(&now),
        week_end: week::week_end(&now),
        locked: week::is_voting_locked(&now),
        time_until_lock_end: week::time_until_lock_end(&now),
        days_until_next_week: week::days_until_next_week(&now),
    })
}
