use crate::api::middleware::RequireAuth;
use crate::api::Success;
use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::services::listening::{ListeningNow, NowPlaying, UserListening};
use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub fn spotify_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth", get(authorize))
        .route("/callback", get(callback))
        .route("/connection", delete(disconnect))
        .route("/now-playing", get(now_playing))
        .route("/listening-now", get(listening_now))
        .route("/listening/:user_id", get(user_listening))
}

async fn authorize(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
) -> Result<Redirect> {
    // The callback stores tokens on this row
    state.users.ensure_user(&claims.new_user()).await?;

    let oauth_state = state.auth_service.issue_oauth_state(&claims.sub)?;
    let url = state.spotify.authorize_url(&oauth_state)?;

    Ok(Redirect::temporary(&url))
}

/// Always lands the browser back on the profile page with the outcome in the query string.
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let outcome = match complete_authorization(&state, query).await {
        Ok(()) => ("spotify_success", "true".to_string()),
        Err(reason) => ("spotify_error", reason),
    };

    profile_redirect(&state.app_url, outcome.0, &outcome.1)
}

async fn complete_authorization(
    state: &AppState,
    query: CallbackQuery,
) -> std::result::Result<(), String> {
    if let Some(error) = query.error {
        return Err(error);
    }

    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err("missing_params".to_string());
    };

    let user_id = state
        .auth_service
        .verify_oauth_state(&oauth_state)
        .map_err(|_| "invalid_state".to_string())?;

    state
        .token_manager
        .connect(&user_id, &code)
        .await
        .map_err(|e| {
            tracing::error!("Spotify callback failed for user {}: {}", user_id, e);
            match e {
                AppError::ExternalApi(_) => "token_exchange_failed".to_string(),
                _ => "server_error".to_string(),
            }
        })
}

fn profile_redirect(app_url: &str, key: &str, value: &str) -> Redirect {
    let base = format!("{}/profile", app_url);
    let url = reqwest::Url::parse_with_params(&base, &[(key, value)])
        .map(|url| url.to_string())
        .unwrap_or(base);

    Redirect::temporary(&url)
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
) -> Result<Json<Success>> {
    state.token_manager.disconnect(&claims.sub).await?;
    Ok(Json(Success::new()))
}

async fn now_playing(
    State(state): State<Arc<AppState>>,
    RequireAuth(claims): RequireAuth,
) -> Result<Json<NowPlaying>> {
    Ok(Json(state.listening.now_playing(&claims.sub).await?))
}

async fn listening_now(State(state): State<Arc<AppState>>) -> Result<Json<ListeningNow>> {
    Ok(Json(state.listening.listening_now().await?))
}

async fn user_listening(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserListening>> {
    Ok(Json(state.listening.listening(&user_id).await?))
}
