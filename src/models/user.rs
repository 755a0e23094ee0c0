use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::social::ProfilePost;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Subject issued by the identity provider
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Identity details used to create a user row on first contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

impl NewUser {
    /// Usernames are lowercase with whitespace replaced by underscores.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let username = display_name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");

        Self {
            id: id.into(),
            username,
            display_name,
        }
    }
}

/// Stored OAuth token record for the music provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct SpotifyTokens {
    pub spotify_access_token: Option<String>,
    pub spotify_refresh_token: Option<String>,
    pub spotify_expires_at: Option<DateTime<Utc>>,
}

impl SpotifyTokens {
    pub fn is_connected(&self) -> bool {
        self.spotify_access_token.is_some() && self.spotify_refresh_token.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub posts_count: i64,
    pub is_following: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub posts: Vec<ProfilePost>,
    pub followers_count: i64,
    pub following_count: i64,
    pub posts_count: i64,
    pub is_following: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(max = 500, message = "Bio must be 500 characters or less"))]
    pub bio: Option<String>,
    #[validate(url(message = "Avatar must be a valid URL"))]
    pub avatar_url: Option<String>,
}
