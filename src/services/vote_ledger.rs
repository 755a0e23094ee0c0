use crate::error::{AppError, Result};
use crate::models::{
    ArchiveWeek, BallotStatus, RankedTrack, TrackTally, VoteAction, VoteOutcome, VotePolicy,
    VoteValue,
};
use crate::store::{TrackStore, VoteStore};
use crate::week::{self, Clock};
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::sync::Arc;
use uuid::Uuid;

/// Number of tracks kept per archived week.
pub const ARCHIVE_TOP_N: usize = 10;

/// Orders tallies by descending vote sum. Ties keep creation order.
pub fn rank(tallies: Vec<TrackTally>) -> Vec<RankedTrack> {
    let mut ranked: Vec<RankedTrack> = tallies.into_iter().map(RankedTrack::from).collect();
    ranked.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));
    ranked
}

/// The only writer of votes.
pub struct VoteLedger {
    tracks: Arc<dyn TrackStore>,
    votes: Arc<dyn VoteStore>,
    clock: Arc<dyn Clock>,
    policy: VotePolicy,
}

impl VoteLedger {
    pub fn new(
        tracks: Arc<dyn TrackStore>,
        votes: Arc<dyn VoteStore>,
        clock: Arc<dyn Clock>,
        policy: VotePolicy,
    ) -> Self {
        Self {
            tracks,
            votes,
            clock,
            policy,
        }
    }

    pub async fn cast_vote(
        &self,
        track_id: Uuid,
        user_id: Option<&str>,
        value: i64,
    ) -> Result<VoteOutcome> {
        let user_id = user_id.ok_or(AppError::Unauthorized)?;

        if week::is_voting_locked(&self.clock.now()) {
            return Err(AppError::VotingLocked);
        }

        let value = VoteValue::from_signed(value)
            .ok_or_else(|| AppError::InvalidInput("Vote value must be 1 or -1".to_string()))?;

        let track = self
            .tracks
            .get_track(track_id)
            .await?
            .ok_or_else(|| AppError::InvalidInput("Track not found".to_string()))?;

        let outcome = match self.policy {
            VotePolicy::Toggle => self.cast_toggle(track.id, user_id, value).await?,
            VotePolicy::Scarce => {
                self.cast_scarce(track.id, track.week_start, user_id, value)
                    .await?
            }
        };

        tracing::info!(
            "Vote {:?} on track {} by {} ({} policy)",
            outcome.action,
            track.id,
            user_id,
            self.policy
        );
        Ok(outcome)
    }

    async fn cast_toggle(&self, track_id: Uuid, user_id: &str, value: VoteValue) -> Result<VoteOutcome> {
        let value = value.as_i32();

        match self.votes.find_vote(track_id, user_id).await? {
            Some(existing) if existing.value == value => {
                self.votes.delete_vote(existing.id).await?;
                Ok(VoteOutcome {
                    action: VoteAction::Removed,
                    value: 0,
                })
            }
            Some(existing) => {
                self.votes.update_vote(existing.id, value).await?;
                Ok(VoteOutcome {
                    action: VoteAction::Updated,
                    value,
                })
            }
            None => {
                self.votes.create_vote(track_id, user_id, value).await?;
                Ok(VoteOutcome {
                    action: VoteAction::Created,
                    value,
                })
            }
        }
    }

    async fn cast_scarce(
        &self,
        track_id: Uuid,
        week_start: NaiveDate,
        user_id: &str,
        value: VoteValue,
    ) -> Result<VoteOutcome> {
        if self.votes.find_vote(track_id, user_id).await?.is_some() {
            return Err(AppError::VoteLocked);
        }

        self.votes
            .create_ballot_vote(track_id, user_id, value.as_i32(), week_start)
            .await?
            .ok_or(AppError::BallotExhausted(value.label()))?;

        Ok(VoteOutcome {
            action: VoteAction::Created,
            value: value.as_i32(),
        })
    }

    /// The caller's vote on a track; 0 when absent or unauthenticated.
    pub async fn get_user_vote(&self, track_id: Uuid, user_id: Option<&str>) -> Result<i32> {
        let Some(user_id) = user_id else {
            return Ok(0);
        };

        Ok(self
            .votes
            .find_vote(track_id, user_id)
            .await?
            .map(|vote| vote.value)
            .unwrap_or(0))
    }

    pub async fn tally(&self, week_start: NaiveDate) -> Result<Vec<RankedTrack>> {
        let tallies = self.tracks.week_tallies(week_start).await?;
        Ok(rank(tallies))
    }

    pub async fn current_tally(&self) -> Result<Vec<RankedTrack>> {
        self.tally(self.current_week()).await
    }

    /// Past weeks, newest first, each with its top tracks.
    pub async fn archive(&self) -> Result<Vec<ArchiveWeek>> {
        let weeks = self.tracks.weeks_before(self.current_week()).await?;

        try_join_all(weeks.into_iter().map(|week_start| async move {
            let mut tracks = self.tally(week_start).await?;
            tracks.truncate(ARCHIVE_TOP_N);
            Ok::<_, AppError>(ArchiveWeek { week_start, tracks })
        }))
        .await
    }

    /// Which directions the user has spent this week under the scarce policy.
    pub async fn ballot(&self, user_id: &str) -> Result<BallotStatus> {
        let week_start = self.current_week();
        let upvote_used = self
            .votes
            .find_vote_in_week(user_id, VoteValue::Up.as_i32(), week_start)
            .await?
            .is_some();
        let downvote_used = self
            .votes
            .find_vote_in_week(user_id, VoteValue::Down.as_i32(), week_start)
            .await?
            .is_some();

        Ok(BallotStatus {
            policy: self.policy,
            upvote_used,
            downvote_used,
        })
    }

    fn current_week(&self) -> NaiveDate {
        week::week_start_date(&self.clock.now())
    }
}
