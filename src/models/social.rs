use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::user::UserSummary;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostComment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[sqlx(flatten)]
    pub user: PostAuthor,
}

/// Author columns joined onto posts and post comments.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostAuthor {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedPostRow {
    pub id: Uuid,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub like_count: i64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: Uuid,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
    pub comments: Vec<PostComment>,
    pub like_count: i64,
    pub comment_count: i64,
    pub is_liked: bool,
}

impl FeedPost {
    pub fn from_row(row: FeedPostRow, comments: Vec<PostComment>) -> Self {
        FeedPost {
            id: row.id,
            user: UserSummary {
                id: row.user_id.clone(),
                username: row.username,
                display_name: row.display_name,
                avatar_url: row.avatar_url,
            },
            user_id: row.user_id,
            content: row.content,
            created_at: row.created_at,
            comment_count: comments.len() as i64,
            comments,
            like_count: row.like_count,
            is_liked: row.is_liked,
        }
    }
}

/// A post as listed on its author's profile.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePost {
    pub id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub like_count: i64,
    pub comment_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HotTake {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HotTakeSummary {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub comment_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HotTakeComment {
    pub id: Uuid,
    pub hot_take_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TrackComment {
    pub id: Uuid,
    pub track_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePostRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 1000, message = "Post must be between 1 and 1000 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateHotTakeRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 1000, message = "Content must be between 1 and 1000 characters"))]
    pub content: String,
}

/// Comment body shared by posts, hot takes and tracks; each route applies its own limit.
#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    #[serde(default)]
    pub text: String,
}

impl CreateCommentRequest {
    /// Trimmed comment text, rejected when empty or longer than `max_chars`.
    pub fn validated_text(&self, max_chars: usize) -> Result<String, String> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err("Comment text is required".to_string());
        }
        if text.chars().count() > max_chars {
            return Err(format!("Comment must be {} characters or less", max_chars));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_text_is_trimmed_and_bounded() {
        let req = CreateCommentRequest {
            text: "  fire track  ".to_string(),
        };
        assert_eq!(req.validated_text(500).unwrap(), "fire track");

        let blank = CreateCommentRequest {
            text: "   ".to_string(),
        };
        assert_eq!(blank.validated_text(500).unwrap_err(), "Comment text is required");

        let long = CreateCommentRequest {
            text: "a".repeat(501),
        };
        assert!(long.validated_text(500).is_err());
        assert!(long.validated_text(1000).is_ok());

        let padded = CreateCommentRequest {
            text: format!("  {}  ", "a".repeat(500)),
        };
        assert_eq!(padded.validated_text(500).unwrap().len(), 500);
    }

    #[test]
    fn post_length_is_validated() {
        let ok = CreatePostRequest {
            content: "new drop friday".to_string(),
        };
        assert!(ok.validate().is_ok());

        let too_long = CreatePostRequest {
            content: "x".repeat(1001),
        };
        assert!(too_long.validate().is_err());

        let empty = CreatePostRequest {
            content: String::new(),
        };
        assert!(empty.validate().is_err());
    }
}
