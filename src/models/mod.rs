pub mod social;
pub mod track;
pub mod user;
pub mod vote;

pub use social::{
    CreateCommentRequest, CreateHotTakeRequest, CreatePostRequest, FeedPost, FeedPostRow,
    HotTake, HotTakeComment, HotTakeSummary, PostAuthor, PostComment, ProfilePost, TrackComment,
};
pub use track::{ArchiveWeek, NewTrack, RankedTrack, Track, TrackTally};
pub use user::{
    NewUser, SpotifyTokens, UpdateProfileRequest, User, UserProfile, UserStats, UserSummary,
};
pub use vote::{BallotStatus, CastVoteRequest, Vote, VoteAction, VoteOutcome, VotePolicy, VoteValue};
