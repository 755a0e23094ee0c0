use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Voting is locked on Sundays")]
    VotingLocked,

    #[error("Your vote on this track is locked in")]
    VoteLocked,

    #[error("You have already used your {0} this week")]
    BallotExhausted(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Spotify not connected")]
    SpotifyNotConnected,

    #[error("Failed to refresh Spotify token: {0}")]
    TokenRefreshFailed(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable kind sent alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::VotingLocked => "voting_locked",
            AppError::VoteLocked => "vote_locked",
            AppError::BallotExhausted(_) => "ballot_exhausted",
            AppError::Conflict(_) => "conflict",
            AppError::SpotifyNotConnected => "spotify_not_connected",
            AppError::TokenRefreshFailed(_) => "token_refresh_failed",
            AppError::ExternalApi(_) => "external_api",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, error_message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Validation(msg) | AppError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, msg)
            }
            AppError::VotingLocked | AppError::SpotifyNotConnected => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            AppError::VoteLocked | AppError::BallotExhausted(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::TokenRefreshFailed(ref msg) => {
                tracing::warn!("Token refresh failed: {}", msg);
                (StatusCode::BAD_GATEWAY, "Failed to refresh Spotify token".to_string())
            }
            AppError::ExternalApi(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Internal(ref e) => {
                tracing::error!("Internal error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// True when a database error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_errors_map_to_expected_status() {
        let cases = [
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AppError::VotingLocked, StatusCode::FORBIDDEN),
            (AppError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::VoteLocked, StatusCode::CONFLICT),
            (AppError::BallotExhausted("upvote"), StatusCode::CONFLICT),
            (AppError::TokenRefreshFailed("401".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn ballot_message_names_direction() {
        assert_eq!(
            AppError::BallotExhausted("downvote").to_string(),
            "You have already used your downvote this week"
        );
    }
}
