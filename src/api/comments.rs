use crate::api::middleware::RequireAuth;
use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::models::{CreateCommentRequest, TrackComment};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

const TRACK_COMMENT_MAX_CHARS: usize = 500;

pub fn comment_routes() -> Router<Arc<AppState>> {
    Router::new().route("/comments/:track_id", get(list_comments).post(create_comment))
}

async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(track_id): Path<Uuid>,
) -> Result<Json<Vec<TrackComment>>> {
    let comments = sqlx::query_as::<_, TrackComment>(
        r#"
        SELECT id, track_id, user_id, user_name, text, created_at
        FROM track_comments
        WHERE track_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(track_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(track_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<Json<TrackComment>> {
    let text = req
        .validated_text(TRACK_COMMENT_MAX_CHARS)
        .map_err(AppError::Validation)?;

    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM tracks WHERE id = $1)")
        .bind(track_id)
        .fetch_one(&state.db)
        .await?;

    if !exists {
        return Err(AppError::NotFound("Track not found".to_string()));
    }

    let comment = sqlx::query_as::<_, TrackComment>(
        r#"
        INSERT INTO track_comments (track_id, user_id, user_name, text)
        VALUES ($1, $2, $3, $4)
        RETURNING id, track_id, user_id, user_name, text, created_at
        "#,
    )
    .bind(track_id)
    .bind(&claims.sub)
    .bind(claims.display_name())
    .bind(&text)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(comment))
}
