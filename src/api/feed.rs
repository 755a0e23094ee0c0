use crate::api::middleware::{MaybeAuth, RequireAuth};
use crate::api::Success;
use crate::app::AppState;
use crate::error::{is_unique_violation, AppError, Result};
use crate::models::{CreateCommentRequest, CreatePostRequest, FeedPost, FeedPostRow, PostComment};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

const FEED_LIMIT: i64 = 50;
const POST_COMMENT_MAX_CHARS: usize = 500;

const FEED_SELECT: &str = r#"
    SELECT p.id, p.user_id, p.content, p.created_at,
           u.username, u.display_name, u.avatar_url,
           (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) AS like_count,
           EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = $1::TEXT) AS is_liked
    FROM posts p
    JOIN users u ON u.id = p.user_id
"#;

pub fn feed_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/feed", get(list_feed).post(create_post))
        .route("/feed/:id/comments", post(create_comment))
        .route("/feed/:id/like", post(like_post).delete(unlike_post))
}

async fn load_comments(db: &PgPool, post_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<PostComment>>> {
    let comments = sqlx::query_as::<_, PostComment>(
        r#"
        SELECT c.id, c.post_id, c.user_id, c.text, c.created_at,
               u.username, u.display_name, u.avatar_url
        FROM post_comments c
        JOIN users u ON u.id = c.user_id
        WHERE c.post_id = ANY($1)
        ORDER BY c.created_at ASC
        "#,
    )
    .bind(post_ids)
    .fetch_all(db)
    .await?;

    let mut by_post: HashMap<Uuid, Vec<PostComment>> = HashMap::new();
    for comment in comments {
        by_post.entry(comment.post_id).or_default().push(comment);
    }
    Ok(by_post)
}

async fn ensure_post_exists(db: &PgPool, id: Uuid) -> Result<()> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
        .bind(id)
        .fetch_one(db)
        .await?;

    if !exists {
        return Err(AppError::NotFound("Post not found".to_string()));
    }
    Ok(())
}

async fn list_feed(
    State(state): State<Arc<AppState>>,
    MaybeAuth(claims): MaybeAuth,
) -> Result<Json<Vec<FeedPost>>> {
    let viewer = claims.map(|c| c.sub);

    let rows = sqlx::query_as::<_, FeedPostRow>(&format!(
        "{} ORDER BY p.created_at DESC LIMIT $2",
        FEED_SELECT
    ))
    .bind(&viewer)
    .bind(FEED_LIMIT)
    .fetch_all(&state.db)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut comments = load_comments(&state.db, &ids).await?;

    let posts = rows
        .into_iter()
        .map(|row| {
            let post_comments = comments.remove(&row.id).unwrap_or_default();
            FeedPost::from_row(row, post_comments)
        })
        .collect();

    Ok(Json(posts))
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Json(req): Json<CreatePostRequest>,
) -> Result<Json<FeedPost>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let content = req.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Content is required".to_string()));
    }

    state.users.ensure_user(&claims.new_user()).await?;

    let id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO posts (user_id, content) VALUES ($1, $2) RETURNING id",
    )
    .bind(&claims.sub)
    .bind(content)
    .fetch_one(&state.db)
    .await?;

    let row = sqlx::query_as::<_, FeedPostRow>(&format!("{} WHERE p.id = $2", FEED_SELECT))
        .bind(&claims.sub)
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!("User {} created post {}", claims.sub, id);

    Ok(Json(FeedPost::from_row(row, Vec::new())))
}

async fn create_comment(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(post_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<Json<PostComment>> {
    let text = req
        .validated_text(POST_COMMENT_MAX_CHARS)
        .map_err(AppError::Validation)?;

    ensure_post_exists(&state.db, post_id).await?;
    state.users.ensure_user(&claims.new_user()).await?;

    let comment = sqlx::query_as::<_, PostComment>(
        r#"
        WITH c AS (
            INSERT INTO post_comments (post_id, user_id, text)
            VALUES ($1, $2, $3)
            RETURNING *
        )
        SELECT c.id, c.post_id, c.user_id, c.text, c.created_at,
               u.username, u.display_name, u.avatar_url
        FROM c
        JOIN users u ON u.id = c.user_id
        "#,
    )
    .bind(post_id)
    .bind(&claims.sub)
    .bind(&text)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(comment))
}

async fn like_post(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Success>> {
    ensure_post_exists(&state.db, post_id).await?;
    state.users.ensure_user(&claims.new_user()).await?;

    sqlx::query("INSERT INTO post_likes (post_id, user_id) VALUES ($1, $2)")
        .bind(post_id)
        .bind(&claims.sub)
        .execute(&state.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Validation("Already liked".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    Ok(Json(Success::new()))
}

async fn unlike_post(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Success>> {
    let result = sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
        .bind(post_id)
        .bind(&claims.sub)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Like not found".to_string()));
    }

    Ok(Json(Success::new()))
}
