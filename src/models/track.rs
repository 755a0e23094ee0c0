use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub spotify_url: Option<String>,
    pub youtube_url: Option<String>,
    pub image_url: Option<String>,
    /// Monday of the voting week this track competes in
    pub week_start: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Track data supplied by an import, before it is assigned a week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewTrack {
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[validate(length(min = 1, max = 300))]
    pub artist: String,
    #[validate(url)]
    pub spotify_url: Option<String>,
    #[validate(url)]
    pub youtube_url: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
}

/// A track with its aggregated votes, as loaded from storage.
#[derive(Debug, Clone, FromRow)]
pub struct TrackTally {
    #[sqlx(flatten)]
    pub track: Track,
    pub vote_count: i64,
    pub total_votes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTrack {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub spotify_url: Option<String>,
    pub youtube_url: Option<String>,
    pub image_url: Option<String>,
    /// Sum of vote values
    pub vote_count: i64,
    /// Number of votes cast, regardless of direction
    pub total_votes: i64,
}

impl From<TrackTally> for RankedTrack {
    fn from(tally: TrackTally) -> Self {
        RankedTrack {
            id: tally.track.id,
            title: tally.track.title,
            artist: tally.track.artist,
            spotify_url: tally.track.spotify_url,
            youtube_url: tally.track.youtube_url,
            image_url: tally.track.image_url,
            vote_count: tally.vote_count,
            total_votes: tally.total_votes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveWeek {
    pub week_start: NaiveDate,
    pub tracks: Vec<RankedTrack>,
}
