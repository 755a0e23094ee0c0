use super::{TrackStore, UserStore, VoteStore};
use crate::error::{is_unique_violation, AppError, Result};
use crate::models::{NewTrack, NewUser, SpotifyTokens, Track, TrackTally, User, UserSummary, Vote};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TrackStore for PgStore {
    async fn insert_tracks(&self, week_start: NaiveDate, tracks: &[NewTrack]) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        let mut created = 0;

        for track in tracks {
            let result = sqlx::query(
                r#"
                INSERT INTO tracks (title, artist, spotify_url, youtube_url, image_url, week_start)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&track.title)
            .bind(&track.artist)
            .bind(&track.spotify_url)
            .bind(&track.youtube_url)
            .bind(&track.image_url)
            .bind(week_start)
            .execute(&mut *tx)
            .await?;

            created += result.rows_affected();
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_track(&self, id: Uuid) -> Result<Option<Track>> {
        let track = sqlx::query_as::<_, Track>("SELECT * FROM tracks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(track)
    }

    async fn week_tallies(&self, week_start: NaiveDate) -> Result<Vec<TrackTally>> {
        let tallies = sqlx::query_as::<_, TrackTally>(
            r#"
            SELECT
                t.*,
                COALESCE(SUM(v.value), 0)::BIGINT AS vote_count,
                COUNT(v.id) AS total_votes
            FROM tracks t
            LEFT JOIN votes v ON v.track_id = t.id
            WHERE t.week_start = $1
            GROUP BY t.id
            ORDER BY t.created_at ASC
            "#,
        )
        .bind(week_start)
        .fetch_all(&self.db)
        .await?;

        Ok(tallies)
    }

    async fn weeks_before(&self, week_start: NaiveDate) -> Result<Vec<NaiveDate>> {
        let weeks: Vec<(NaiveDate,)> = sqlx::query_as(
            "SELECT DISTINCT week_start FROM tracks WHERE week_start < $1 ORDER BY week_start DESC",
        )
        .bind(week_start)
        .fetch_all(&self.db)
        .await?;

        Ok(weeks.into_iter().map(|(week,)| week).collect())
    }

    async fn delete_week(&self, week_start: NaiveDate) -> Result<u64> {
        // votes and track comments cascade
        let result = sqlx::query("DELETE FROM tracks WHERE week_start = $1")
            .bind(week_start)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VoteStore for PgStore {
    async fn find_vote(&self, track_id: Uuid, user_id: &str) -> Result<Option<Vote>> {
        let vote = sqlx::query_as::<_, Vote>(
            "SELECT * FROM votes WHERE track_id = $1 AND user_id = $2",
        )
        .bind(track_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(vote)
    }

    async fn find_vote_in_week(
        &self,
        user_id: &str,
        value: i32,
        week_start: NaiveDate,
    ) -> Result<Option<Vote>> {
        let vote = sqlx::query_as::<_, Vote>(
            r#"
            SELECT v.*
            FROM votes v
            JOIN tracks t ON t.id = v.track_id
            WHERE v.user_id = $1 AND v.value = $2 AND t.week_start = $3
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(value)
        .bind(week_start)
        .fetch_optional(&self.db)
        .await?;

        Ok(vote)
    }

    async fn create_vote(&self, track_id: Uuid, user_id: &str, value: i32) -> Result<Vote> {
        sqlx::query_as::<_, Vote>(
            r#"
            INSERT INTO votes (track_id, user_id, value)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(track_id)
        .bind(user_id)
        .bind(value)
        .fetch_one(&self.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("A vote for this track was recorded concurrently".to_string())
            } else {
                AppError::Database(e)
            }
        })
    }

    async fn create_ballot_vote(
        &self,
        track_id: Uuid,
        user_id: &str,
        value: i32,
        week_start: NaiveDate,
    ) -> Result<Option<Vote>> {
        let mut tx = self.db.begin().await?;

        // Serializes ballot writes per user until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let spent: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT v.id
            FROM votes v
            JOIN tracks t ON t.id = v.track_id
            WHERE v.user_id = $1 AND v.value = $2 AND t.week_start = $3
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(value)
        .bind(week_start)
        .fetch_optional(&mut *tx)
        .await?;

        if spent.is_some() {
            return Ok(None);
        }

        let vote = sqlx::query_as::<_, Vote>(
            r#"
            INSERT INTO votes (track_id, user_id, value)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(track_id)
        .bind(user_id)
        .bind(value)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::VoteLocked
            } else {
                AppError::Database(e)
            }
        })?;

        tx.commit().await?;
        Ok(Some(vote))
    }

    async fn update_vote(&self, vote_id: Uuid, value: i32) -> Result<()> {
        sqlx::query("UPDATE votes SET value = $1 WHERE id = $2")
            .bind(value)
            .bind(vote_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn delete_vote(&self, vote_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM votes WHERE id = $1")
            .bind(vote_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn ensure_user(&self, user: &NewUser) -> Result<User> {
        let existing = sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, bio, avatar_url, created_at FROM users WHERE id = $1",
        )
        .bind(&user.id)
        .fetch_optional(&self.db)
        .await?;

        if let Some(existing) = existing {
            return Ok(existing);
        }

        // A taken username gets the identity subject appended
        let fallback_username = format!("{}_{}", user.username, user.id.to_lowercase());

        for username in [&user.username, &fallback_username] {
            let created = sqlx::query_as::<_, User>(
                r#"
                INSERT INTO users (id, username, display_name)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                RETURNING id, username, display_name, bio, avatar_url, created_at
                "#,
            )
            .bind(&user.id)
            .bind(username)
            .bind(&user.display_name)
            .fetch_optional(&self.db)
            .await?;

            if let Some(created) = created {
                tracing::info!("Created user {} ({})", created.username, created.id);
                return Ok(created);
            }
        }

        // Lost a race with a concurrent insert of the same id
        sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, bio, avatar_url, created_at FROM users WHERE id = $1",
        )
        .bind(&user.id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::Conflict("Username already taken".to_string()))
    }

    async fn spotify_tokens(&self, user_id: &str) -> Result<Option<SpotifyTokens>> {
        let tokens = sqlx::query_as::<_, SpotifyTokens>(
            r#"
            SELECT spotify_access_token, spotify_refresh_token, spotify_expires_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(tokens)
    }

    async fn save_spotify_tokens(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET spotify_access_token = $1, spotify_refresh_token = $2, spotify_expires_at = $3
            WHERE id = $4
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        Ok(())
    }

    async fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET spotify_access_token = $1,
                spotify_expires_at = $2,
                spotify_refresh_token = COALESCE($3, spotify_refresh_token)
            WHERE id = $4
            "#,
        )
        .bind(access_token)
        .bind(expires_at)
        .bind(refresh_token)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn clear_spotify_tokens(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET spotify_access_token = NULL, spotify_refresh_token = NULL, spotify_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn spotify_connected_users(&self) -> Result<Vec<UserSummary>> {
        let users = sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT id, username, display_name, avatar_url
            FROM users
            WHERE spotify_access_token IS NOT NULL AND spotify_refresh_token IS NOT NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }
}
