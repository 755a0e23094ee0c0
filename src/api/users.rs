use crate::api::middleware::{MaybeAuth, RequireAuth};
use crate::api::Success;
use crate::app::AppState;
use crate::error::{is_unique_violation, AppError, Result};
use crate::models::{ProfilePost, UpdateProfileRequest, User, UserProfile, UserStats};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use validator::Validate;

const USER_COLUMNS: &str = "id, username, display_name, bio, avatar_url, created_at";

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct FollowCounts {
    followers_count: i64,
    following_count: i64,
    posts_count: i64,
    is_following: bool,
}

pub fn user_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/search", get(search_users))
        .route("/users/:username", get(get_profile).patch(update_profile))
        .route("/users/:username/follow", post(follow).delete(unfollow))
}

/// Escapes `LIKE` wildcards so the query matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

async fn find_by_username(db: &PgPool, username: &str) -> Result<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS))
        .bind(username)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

async fn search_users(
    State(state): State<Arc<AppState>>,
    MaybeAuth(claims): MaybeAuth,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserStats>>> {
    let viewer = claims.map(|c| c.sub);
    let pattern = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(like_pattern);

    let users = sqlx::query_as::<_, UserStats>(
        r#"
        SELECT u.id, u.username, u.display_name, u.avatar_url, u.bio,
               (SELECT COUNT(*) FROM follows f WHERE f.following_id = u.id) AS followers_count,
               (SELECT COUNT(*) FROM follows f WHERE f.follower_id = u.id) AS following_count,
               (SELECT COUNT(*) FROM posts p WHERE p.user_id = u.id) AS posts_count,
               EXISTS(SELECT 1 FROM follows f WHERE f.following_id = u.id AND f.follower_id = $2::TEXT) AS is_following
        FROM users u
        WHERE $1::TEXT IS NULL
           OR u.username ILIKE $1
           OR u.display_name ILIKE $1
        ORDER BY u.created_at DESC
        "#,
    )
    .bind(&pattern)
    .bind(&viewer)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(users))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    MaybeAuth(claims): MaybeAuth,
    Path(username): Path<String>,
) -> Result<Json<UserProfile>> {
    let user = find_by_username(&state.db, &username).await?;
    let viewer = claims.map(|c| c.sub);

    let posts = sqlx::query_as::<_, ProfilePost>(
        r#"
        SELECT p.id, p.content, p.created_at,
               (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) AS like_count,
               (SELECT COUNT(*) FROM post_comments c WHERE c.post_id = p.id) AS comment_count
        FROM posts p
        WHERE p.user_id = $1
        ORDER BY p.created_at DESC
        "#,
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    let counts = sqlx::query_as::<_, FollowCounts>(
        r#"
        SELECT (SELECT COUNT(*) FROM follows WHERE following_id = $1) AS followers_count,
               (SELECT COUNT(*) FROM follows WHERE follower_id = $1) AS following_count,
               (SELECT COUNT(*) FROM posts WHERE user_id = $1) AS posts_count,
               EXISTS(SELECT 1 FROM follows WHERE following_id = $1 AND follower_id = $2::TEXT) AS is_following
        "#,
    )
    .bind(&user.id)
    .bind(&viewer)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(UserProfile {
        user,
        posts,
        followers_count: counts.followers_count,
        following_count: counts.following_count,
        posts_count: counts.posts_count,
        is_following: counts.is_following,
    }))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(username): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<User>> {
    let user = match find_by_username(&state.db, &username).await {
        Ok(user) if user.id == claims.sub => user,
        Ok(_) | Err(AppError::NotFound(_)) => return Err(AppError::Forbidden),
        Err(e) => return Err(e),
    };

    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let updated = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET bio = COALESCE($1, bio),
            avatar_url = COALESCE($2, avatar_url)
        WHERE id = $3
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(&req.bio)
    .bind(&req.avatar_url)
    .bind(&user.id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!("User {} updated their profile", user.id);
    Ok(Json(updated))
}

async fn follow(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(username): Path<String>,
) -> Result<Json<Success>> {
    let target = find_by_username(&state.db, &username).await?;

    if target.id == claims.sub {
        return Err(AppError::Validation("Cannot follow yourself".to_string()));
    }

    state.users.ensure_user(&claims.new_user()).await?;

    sqlx::query("INSERT INTO follows (follower_id, following_id) VALUES ($1, $2)")
        .bind(&claims.sub)
        .bind(&target.id)
        .execute(&state.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Validation("Already following".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    Ok(Json(Success::new()))
}

async fn unfollow(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
    Path(username): Path<String>,
) -> Result<Json<Success>> {
    let target = find_by_username(&state.db, &username).await?;

    let result = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
        .bind(&claims.sub)
        .bind(&target.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Not following this user".to_string()));
    }

    Ok(Json(Success::new()))
}
