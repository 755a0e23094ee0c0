use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How repeated votes by the same user are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotePolicy {
    /// One vote per track; repeating a vote removes it, the opposite value replaces it.
    Toggle,
    /// One upvote and one downvote per week across all tracks; votes are final.
    Scarce,
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self::Toggle
    }
}

impl FromStr for VotePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toggle" => Ok(VotePolicy::Toggle),
            "scarce" | "scarce_ballot" | "scarce-ballot" => Ok(VotePolicy::Scarce),
            other => Err(format!(
                "unknown vote policy '{}', expected 'toggle' or 'scarce'",
                other
            )),
        }
    }
}

impl fmt::Display for VotePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VotePolicy::Toggle => write!(f, "toggle"),
            VotePolicy::Scarce => write!(f, "scarce"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn from_signed(value: i64) -> Option<Self> {
        match value {
            1 => Some(VoteValue::Up),
            -1 => Some(VoteValue::Down),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VoteValue::Up => "upvote",
            VoteValue::Down => "downvote",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: Uuid,
    pub track_id: Uuid,
    pub user_id: String,
    pub value: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub track_id: Option<String>,
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteAction {
    Created,
    Updated,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub action: VoteAction,
    /// The caller's vote on the track after the action; 0 when removed
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotStatus {
    pub policy: VotePolicy,
    pub upvote_used: bool,
    pub downvote_used: bool,
}
