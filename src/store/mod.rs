//! Persistence seams for the voting core and token records.
//!
//! Handlers and services depend on these traits rather than on a pool so the
//! ledger and token lifecycle can run against [`MemoryStore`] in tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{NewTrack, NewUser, SpotifyTokens, Track, TrackTally, User, UserSummary, Vote};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

#[async_trait]
pub trait TrackStore: Send + Sync {
    /// Inserts all tracks into one week, atomically. Returns the number created.
    async fn insert_tracks(&self, week_start: NaiveDate, tracks: &[NewTrack]) -> Result<u64>;

    async fn get_track(&self, id: Uuid) -> Result<Option<Track>>;

    /// Tracks of one week with vote sums, in creation order.
    async fn week_tallies(&self, week_start: NaiveDate) -> Result<Vec<TrackTally>>;

    /// Distinct weeks strictly before `week_start`, newest first.
    async fn weeks_before(&self, week_start: NaiveDate) -> Result<Vec<NaiveDate>>;

    /// Deletes a week's tracks along with their votes. Returns the number of tracks removed.
    async fn delete_week(&self, week_start: NaiveDate) -> Result<u64>;
}

#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn find_vote(&self, track_id: Uuid, user_id: &str) -> Result<Option<Vote>>;

    /// Any vote by `user_id` with `value` on a track of the given week.
    async fn find_vote_in_week(
        &self,
        user_id: &str,
        value: i32,
        week_start: NaiveDate,
    ) -> Result<Option<Vote>>;

    /// Fails with `Conflict` when the user already has a vote on the track.
    async fn create_vote(&self, track_id: Uuid, user_id: &str, value: i32) -> Result<Vote>;

    /// Records a scarce-policy vote unless the user already cast `value` on a
    /// track of `week_start`. The check and the insert are atomic per user.
    /// Returns `None` when that direction is already spent.
    async fn create_ballot_vote(
        &self,
        track_id: Uuid,
        user_id: &str,
        value: i32,
        week_start: NaiveDate,
    ) -> Result<Option<Vote>>;

    async fn update_vote(&self, vote_id: Uuid, value: i32) -> Result<()>;

    async fn delete_vote(&self, vote_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns the user row, creating it from identity details on first contact.
    async fn ensure_user(&self, user: &NewUser) -> Result<User>;

    async fn spotify_tokens(&self, user_id: &str) -> Result<Option<SpotifyTokens>>;

    /// Replaces the whole token record after an authorization code exchange.
    async fn save_spotify_tokens(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Stores a refreshed access token. The refresh token is kept when `refresh_token` is `None`.
    async fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn clear_spotify_tokens(&self, user_id: &str) -> Result<()>;

    /// Users holding both an access and a refresh token.
    async fn spotify_connected_users(&self) -> Result<Vec<UserSummary>>;
}
