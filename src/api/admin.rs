use crate::api::middleware::RequireAdminKey;
use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::models::NewTrack;
use axum::{extract::State, routing::post, Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Either Spotify links to resolve or fully described tracks.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    #[serde(default)]
    spotify_urls: Option<Vec<String>>,
    #[serde(default)]
    tracks: Option<Vec<NewTrack>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    success: bool,
    count: u64,
    week_start: NaiveDate,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: u64,
}

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new().route("/tracks", post(import_tracks).delete(delete_tracks))
}

async fn import_tracks(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdminKey,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportResponse>> {
    let summary = match (req.spotify_urls, req.tracks) {
        (Some(urls), _) if !urls.is_empty() => state.importer.import_sources(&urls).await?,
        (_, Some(tracks)) => state.importer.import_tracks(tracks).await?,
        _ => {
            return Err(AppError::InvalidInput(
                "Provide spotifyUrls or tracks".to_string(),
            ))
        }
    };

    Ok(Json(ImportResponse {
        success: true,
        count: summary.count,
        week_start: summary.week_start,
    }))
}

async fn delete_tracks(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdminKey,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.importer.delete_current_week().await?;
    Ok(Json(DeleteResponse { deleted }))
}
