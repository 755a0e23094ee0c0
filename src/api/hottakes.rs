use crate::api::middleware::RequireAuth;
use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::models::{
    CreateCommentRequest, CreateHotTakeRequest, HotTake, HotTakeComment, HotTakeSummary,
};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

const HOT_TAKE_COMMENT_MAX_CHARS: usize = 1000;

pub fn hottake_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/hottakes", get(list_hot_takes).post(create_hot_take))
        .route("/hottakes/:id/comments", get(list_comments).post(create_comment))
}

async fn list_hot_takes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<HotTakeSummary>>> {
    let takes = sqlx::query_as::<_, HotTakeSummary>(
        r#"
        SELECT h.id, h.user_id, h.user_name, h.title, h.content, h.created_at,
               (SELECT COUNT(*) FROM hot_take_comments c WHERE c.hot_take_id = h.id) AS comment_count
        FROM hot_takes h
        ORDER BY h.created_at DESC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(takes))
}

async fn create_hot_take(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Json(req): Json<CreateHotTakeRequest>,
) -> Result<Json<HotTake>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (title, content) = (req.title.trim(), req.content.trim());
    if title.is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if content.is_empty() {
        return Err(AppError::Validation("Content is required".to_string()));
    }

    let take = sqlx::query_as::<_, HotTake>(
        r#"
        INSERT INTO hot_takes (user_id, user_name, title, content)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, user_name, title, content, created_at
        "#,
    )
    .bind(&claims.sub)
    .bind(claims.display_name())
    .bind(title)
    .bind(content)
    .fetch_one(&state.db)
    .await?;

    tracing::info!("User {} posted hot take {}", claims.sub, take.id);
    Ok(Json(take))
}

async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(hot_take_id): Path<Uuid>,
) -> Result<Json<Vec<HotTakeComment>>> {
    let comments = sqlx::query_as::<_, HotTakeComment>(
        r#"
        SELECT id, hot_take_id, user_id, user_name, text, created_at
        FROM hot_take_comments
        WHERE hot_take_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(hot_take_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(hot_take_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<Json<HotTakeComment>> {
    let text = req
        .validated_text(HOT_TAKE_COMMENT_MAX_CHARS)
        .map_err(AppError::Validation)?;

    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM hot_takes WHERE id = $1)")
        .bind(hot_take_id)
        .fetch_one(&state.db)
        .await?;

    if !exists {
        return Err(AppError::NotFound("Hot take not found".to_string()));
    }

    let comment = sqlx::query_as::<_, HotTakeComment>(
        r#"
        INSERT INTO hot_take_comments (hot_take_id, user_id, user_name, text)
        VALUES ($1, $2, $3, $4)
        RETURNING id, hot_take_id, user_id, user_name, text, created_at
        "#,
    )
    .bind(hot_take_id)
    .bind(&claims.sub)
    .bind(claims.display_name())
    .bind(&text)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(comment))
}
