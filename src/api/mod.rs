pub mod admin;
pub mod comments;
pub mod feed;
pub mod health;
pub mod hottakes;
pub mod middleware;
pub mod spotify;
pub mod tracks;
pub mod users;
pub mod votes;

pub use admin::admin_routes;
pub use comments::comment_routes;
pub use feed::feed_routes;
pub use health::health_routes;
pub use hottakes::hottake_routes;
pub use spotify::spotify_routes;
pub use tracks::track_routes;
pub use users::user_routes;
pub use votes::vote_routes;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Success {
    success: bool,
}

impl Success {
    pub fn new() -> Self {
        Self { success: true }
    }
}
