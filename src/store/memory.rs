use super::{TrackStore, UserStore, VoteStore};
use crate::error::{AppError, Result};
use crate::models::{NewTrack, NewUser, SpotifyTokens, Track, TrackTally, User, UserSummary, Vote};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct UserRecord {
    user: User,
    tokens: SpotifyTokens,
}

#[derive(Debug, Default)]
struct Inner {
    tracks: Vec<Track>,
    votes: Vec<Vote>,
    users: Vec<UserRecord>,
}

impl Inner {
    fn vote_in_week(&self, user_id: &str, value: i32, week_start: NaiveDate) -> Option<&Vote> {
        self.votes
            .iter()
            .filter(|v| v.user_id == user_id && v.value == value)
            .find(|v| {
                self.tracks
                    .iter()
                    .any(|t| t.id == v.track_id && t.week_start == week_start)
            })
    }

    fn has_vote(&self, track_id: Uuid, user_id: &str) -> bool {
        self.votes
            .iter()
            .any(|v| v.track_id == track_id && v.user_id == user_id)
    }

    fn push_vote(&mut self, track_id: Uuid, user_id: &str, value: i32) -> Result<Vote> {
        if !self.tracks.iter().any(|t| t.id == track_id) {
            return Err(AppError::NotFound("Track not found".to_string()));
        }

        let vote = Vote {
            id: Uuid::new_v4(),
            track_id,
            user_id: user_id.to_string(),
            value,
            created_at: Utc::now(),
        };
        self.votes.push(vote.clone());
        Ok(vote)
    }
}

/// In-process store with the same uniqueness rules as the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a track with an explicit creation time.
    pub async fn insert_track_at(
        &self,
        week_start: NaiveDate,
        track: NewTrack,
        created_at: DateTime<Utc>,
    ) -> Track {
        let track = Track {
            id: Uuid::new_v4(),
            title: track.title,
            artist: track.artist,
            spotify_url: track.spotify_url,
            youtube_url: track.youtube_url,
            image_url: track.image_url,
            week_start,
            created_at,
        };
        self.inner.lock().await.tracks.push(track.clone());
        track
    }

    pub async fn tracks(&self) -> Vec<Track> {
        self.inner.lock().await.tracks.clone()
    }

    pub async fn votes(&self) -> Vec<Vote> {
        self.inner.lock().await.votes.clone()
    }

    /// Seeds a token record directly, bypassing the OAuth exchange.
    pub async fn set_spotify_tokens(&self, user_id: &str, tokens: SpotifyTokens) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.users.iter_mut().find(|r| r.user.id == user_id) {
            record.tokens = tokens;
        }
    }
}

#[async_trait]
impl TrackStore for MemoryStore {
    async fn insert_tracks(&self, week_start: NaiveDate, tracks: &[NewTrack]) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let base = Utc::now();

        for (i, track) in tracks.iter().enumerate() {
            inner.tracks.push(Track {
                id: Uuid::new_v4(),
                title: track.title.clone(),
                artist: track.artist.clone(),
                spotify_url: track.spotify_url.clone(),
                youtube_url: track.youtube_url.clone(),
                image_url: track.image_url.clone(),
                week_start,
                created_at: base + Duration::microseconds(i as i64),
            });
        }

        Ok(tracks.len() as u64)
    }

    async fn get_track(&self, id: Uuid) -> Result<Option<Track>> {
        let inner = self.inner.lock().await;
        Ok(inner.tracks.iter().find(|t| t.id == id).cloned())
    }

    async fn week_tallies(&self, week_start: NaiveDate) -> Result<Vec<TrackTally>> {
        let inner = self.inner.lock().await;

        let mut week: Vec<&Track> = inner
            .tracks
            .iter()
            .filter(|t| t.week_start == week_start)
            .collect();
        week.sort_by_key(|t| t.created_at);

        Ok(week
            .into_iter()
            .map(|track| {
                let votes = inner.votes.iter().filter(|v| v.track_id == track.id);
                let (vote_count, total_votes) =
                    votes.fold((0i64, 0i64), |(sum, n), v| (sum + i64::from(v.value), n + 1));
                TrackTally {
                    track: track.clone(),
                    vote_count,
                    total_votes,
                }
            })
            .collect())
    }

    async fn weeks_before(&self, week_start: NaiveDate) -> Result<Vec<NaiveDate>> {
        let inner = self.inner.lock().await;
        let weeks: BTreeSet<NaiveDate> = inner
            .tracks
            .iter()
            .map(|t| t.week_start)
            .filter(|w| *w < week_start)
            .collect();

        Ok(weeks.into_iter().rev().collect())
    }

    async fn delete_week(&self, week_start: NaiveDate) -> Result<u64> {
        let mut inner = self.inner.lock().await;

        let removed: Vec<Uuid> = inner
            .tracks
            .iter()
            .filter(|t| t.week_start == week_start)
            .map(|t| t.id)
            .collect();

        inner.tracks.retain(|t| t.week_start != week_start);
        inner.votes.retain(|v| !removed.contains(&v.track_id));

        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl VoteStore for MemoryStore {
    async fn find_vote(&self, track_id: Uuid, user_id: &str) -> Result<Option<Vote>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .votes
            .iter()
            .find(|v| v.track_id == track_id && v.user_id == user_id)
            .cloned())
    }

    async fn find_vote_in_week(
        &self,
        user_id: &str,
        value: i32,
        week_start: NaiveDate,
    ) -> Result<Option<Vote>> {
        let inner = self.inner.lock().await;
        Ok(inner.vote_in_week(user_id, value, week_start).cloned())
    }

    async fn create_vote(&self, track_id: Uuid, user_id: &str, value: i32) -> Result<Vote> {
        let mut inner = self.inner.lock().await;
        if inner.has_vote(track_id, user_id) {
            return Err(AppError::Conflict(
                "A vote for this track was recorded concurrently".to_string(),
            ));
        }
        inner.push_vote(track_id, user_id, value)
    }

    async fn create_ballot_vote(
        &self,
        track_id: Uuid,
        user_id: &str,
        value: i32,
        week_start: NaiveDate,
    ) -> Result<Option<Vote>> {
        let mut inner = self.inner.lock().await;
        if inner.has_vote(track_id, user_id) {
            return Err(AppError::VoteLocked);
        }
        if inner.vote_in_week(user_id, value, week_start).is_some() {
            return Ok(None);
        }
        inner.push_vote(track_id, user_id, value).map(Some)
    }

    async fn update_vote(&self, vote_id: Uuid, value: i32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(vote) = inner.votes.iter_mut().find(|v| v.id == vote_id) {
            vote.value = value;
        }
        Ok(())
    }

    async fn delete_vote(&self, vote_id: Uuid) -> Result<()> {
        self.inner.lock().await.votes.retain(|v| v.id != vote_id);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ensure_user(&self, user: &NewUser) -> Result<User> {
        let mut inner = self.inner.lock().await;

        if let Some(record) = inner.users.iter().find(|r| r.user.id == user.id) {
            return Ok(record.user.clone());
        }

        let taken = inner.users.iter().any(|r| r.user.username == user.username);
        let username = if taken {
            format!("{}_{}", user.username, user.id.to_lowercase())
        } else {
            user.username.clone()
        };

        let created = User {
            id: user.id.clone(),
            username,
            display_name: Some(user.display_name.clone()),
            bio: None,
            avatar_url: None,
            created_at: Utc::now(),
        };
        inner.users.push(UserRecord {
            user: created.clone(),
            tokens: SpotifyTokens::default(),
        });

        Ok(created)
    }

    async fn spotify_tokens(&self, user_id: &str) -> Result<Option<SpotifyTokens>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .iter()
            .find(|r| r.user.id == user_id)
            .map(|r| r.tokens.clone()))
    }

    async fn save_spotify_tokens(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .users
            .iter_mut()
            .find(|r| r.user.id == user_id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        record.tokens = SpotifyTokens {
            spotify_access_token: Some(access_token.to_string()),
            spotify_refresh_token: Some(refresh_token.to_string()),
            spotify_expires_at: Some(expires_at),
        };
        Ok(())
    }

    async fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.users.iter_mut().find(|r| r.user.id == user_id) {
            record.tokens.spotify_access_token = Some(access_token.to_string());
            record.tokens.spotify_expires_at = Some(expires_at);
            if let Some(refresh_token) = refresh_token {
                record.tokens.spotify_refresh_token = Some(refresh_token.to_string());
            }
        }
        Ok(())
    }

    async fn clear_spotify_tokens(&self, user_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.users.iter_mut().find(|r| r.user.id == user_id) {
            record.tokens = SpotifyTokens::default();
        }
        Ok(())
    }

    async fn spotify_connected_users(&self) -> Result<Vec<UserSummary>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .iter()
            .filter(|r| r.tokens.is_connected())
            .map(|r| UserSummary {
                id: r.user.id.clone(),
                username: r.user.username.clone(),
                display_name: r.user.display_name.clone(),
                avatar_url: r.user.avatar_url.clone(),
            })
            .collect())
    }
}
