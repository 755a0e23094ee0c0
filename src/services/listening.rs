use crate::error::{AppError, Result};
use crate::models::UserSummary;
use crate::services::spotify::{PlayingTrack, SpotifyApi};
use crate::services::token_manager::TokenManager;
use crate::store::UserStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub is_playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<PlayingTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTrack {
    #[serde(flatten)]
    pub track: PlayingTrack,
    pub is_playing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PastTrack {
    #[serde(flatten)]
    pub track: PlayingTrack,
    pub played_at: DateTime<Utc>,
}

/// A user's listening activity: what is playing now, else the last play.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListening {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currently_playing: Option<CurrentTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recently_played: Option<PastTrack>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_activity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listener {
    pub user: UserSummary,
    pub track: PlayingTrack,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListeningNow {
    pub listeners: Vec<Listener>,
}

pub struct ListeningService {
    users: Arc<dyn UserStore>,
    spotify: Arc<dyn SpotifyApi>,
    tokens: Arc<TokenManager>,
}

impl ListeningService {
    pub fn new(users: Arc<dyn UserStore>, spotify: Arc<dyn SpotifyApi>, tokens: Arc<TokenManager>) -> Self {
        Self {
            users,
            spotify,
            tokens,
        }
    }

    /// Fails with `SpotifyNotConnected` when the caller has no usable token.
    pub async fn now_playing(&self, user_id: &str) -> Result<NowPlaying> {
        let token = self
            .usable_token(user_id)
            .await?
            .ok_or(AppError::SpotifyNotConnected)?;

        Ok(match self.spotify.currently_playing(&token).await? {
            Some(current) => NowPlaying {
                is_playing: current.is_playing,
                track: current.track,
            },
            None => NowPlaying {
                is_playing: false,
                track: None,
            },
        })
    }

    pub async fn listening(&self, user_id: &str) -> Result<UserListening> {
        let Some(token) = self.usable_token(user_id).await? else {
            return Ok(UserListening::default());
        };

        let current = self
            .spotify
            .currently_playing(&token)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Currently playing lookup failed for user {}: {}", user_id, e);
                None
            });

        if let Some(current) = current {
            if let Some(track) = current.track {
                return Ok(UserListening {
                    connected: true,
                    currently_playing: Some(CurrentTrack {
                        track,
                        is_playing: current.is_playing,
                    }),
                    ..Default::default()
                });
            }
        }

        let recent = self
            .spotify
            .recently_played(&token)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Recently played lookup failed for user {}: {}", user_id, e);
                None
            });

        if let Some(recent) = recent {
            return Ok(UserListening {
                connected: true,
                recently_played: Some(PastTrack {
                    track: recent.track,
                    played_at: recent.played_at,
                }),
                ..Default::default()
            });
        }

        Ok(UserListening {
            connected: true,
            no_activity: true,
            ..Default::default()
        })
    }

    /// Everyone currently playing something. Users whose lookup fails are left out.
    pub async fn listening_now(&self) -> Result<ListeningNow> {
        let users = self.users.spotify_connected_users().await?;

        let results = join_all(users.into_iter().map(|user| async move {
            match self.active_track(&user.id).await {
                Ok(track) => track.map(|track| Listener { user, track }),
                Err(e) => {
                    tracing::warn!("Failed to fetch now playing for user {}: {}", user.id, e);
                    None
                }
            }
        }))
        .await;

        Ok(ListeningNow {
            listeners: results.into_iter().flatten().collect(),
        })
    }

    async fn active_track(&self, user_id: &str) -> Result<Option<PlayingTrack>> {
        let Some(token) = self.tokens.get_valid_access_token(user_id).await? else {
            return Ok(None);
        };

        Ok(self
            .spotify
            .currently_playing(&token)
            .await?
            .filter(|current| current.is_playing)
            .and_then(|current| current.track))
    }

    /// A failed refresh counts as not connected.
    async fn usable_token(&self, user_id: &str) -> Result<Option<String>> {
        match self.tokens.get_valid_access_token(user_id).await {
            Err(AppError::TokenRefreshFailed(reason)) => {
                tracing::warn!("Spotify token refresh failed for user {}: {}", user_id, reason);
                Ok(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTrack, NewUser, SpotifyTokens};
    use crate::services::spotify::{CurrentlyPlaying, RecentlyPlayed, TokenGrant};
    use crate::store::MemoryStore;
    use crate::week::FixedClock;
    use async_trait::async_trait;
    use chrono::{Duration, FixedOffset, TimeZone};

    /// Behaviour keyed by access token: `playing-*` plays, `paused-*` is paused,
    /// `recent-*` only has history, `revoked-*` fails the player call but has
    /// history, `broken-*` fails both, anything else is idle.
    struct StubPlayer;

    fn song(name: &str) -> PlayingTrack {
        PlayingTrack {
            name: name.to_string(),
            artist: "Hanumankind".to_string(),
            album: "Big Dawgs".to_string(),
            image_url: None,
            spotify_url: None,
        }
    }

    #[async_trait]
    impl SpotifyApi for StubPlayer {
        fn authorize_url(&self, _state: &str) -> Result<String> {
            unimplemented!()
        }

        async fn exchange_code(&self, _code: &str) -> Result<TokenGrant> {
            unimplemented!()
        }

        async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant> {
            Err(AppError::TokenRefreshFailed("invalid_grant".to_string()))
        }

        async fn track(&self, _id: &str) -> Result<NewTrack> {
            unimplemented!()
        }

        async fn album_track_ids(&self, _id: &str) -> Result<Vec<String>> {
            unimplemented!()
        }

        async fn playlist_track_ids(&self, _id: &str) -> Result<Vec<String>> {
            unimplemented!()
        }

        async fn currently_playing(&self, token: &str) -> Result<Option<CurrentlyPlaying>> {
            if token.starts_with("broken") {
                return Err(AppError::ExternalApi("Spotify returned status: 500".to_string()));
            }
            if token.starts_with("revoked") {
                return Err(AppError::ExternalApi("Spotify returned status: 403".to_string()));
            }
            let is_playing = token.starts_with("playing");
            if is_playing || token.starts_with("paused") {
                return Ok(Some(CurrentlyPlaying {
                    is_playing,
                    track: Some(song(token)),
                }));
            }
            Ok(None)
        }

        async fn recently_played(&self, token: &str) -> Result<Option<RecentlyPlayed>> {
            if token.starts_with("broken") {
                return Err(AppError::ExternalApi("Spotify returned status: 429".to_string()));
            }
            let has_history = token.starts_with("recent") || token.starts_with("revoked");
            Ok(has_history.then(|| RecentlyPlayed {
                track: song(token),
                played_at: Utc.with_ymd_and_hms(2024, 6, 4, 20, 0, 0).unwrap(),
            }))
        }
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 5, 12, 0, 0)
            .unwrap()
    }

    /// Each `(user_id, access_token, expires_in_minutes)` is a connected user.
    async fn service(users: &[(&str, &str, i64)]) -> ListeningService {
        let store = Arc::new(MemoryStore::new());
        for (id, token, minutes) in users {
            store.ensure_user(&NewUser::new(*id, *id)).await.unwrap();
            store
                .set_spotify_tokens(
                    id,
                    SpotifyTokens {
                        spotify_access_token: Some(token.to_string()),
                        spotify_refresh_token: Some("refresh".to_string()),
                        spotify_expires_at: Some(now().with_timezone(&Utc) + Duration::minutes(*minutes)),
                    },
                )
                .await;
        }
        store.ensure_user(&NewUser::new("offline", "offline")).await.unwrap();

        let spotify: Arc<dyn SpotifyApi> = Arc::new(StubPlayer);
        let tokens = Arc::new(TokenManager::new(
            store.clone(),
            spotify.clone(),
            Arc::new(FixedClock(now())),
        ));
        ListeningService::new(store, spotify, tokens)
    }

    #[tokio::test]
    async fn listening_now_isolates_failures() {
        let service = service(&[
            ("a", "playing-a", 60),
            ("b", "broken-b", 60),
            ("c", "paused-c", 60),
            ("d", "playing-d", 1),
            ("e", "playing-e", 60),
        ])
        .await;

        let result = service.listening_now().await.unwrap();
        let ids: Vec<&str> = result.listeners.iter().map(|l| l.user.id.as_str()).collect();

        assert_eq!(ids, vec!["a", "e"]);
        assert_eq!(result.listeners[0].track.name, "playing-a");
    }

    #[tokio::test]
    async fn listening_prefers_current_track() {
        let service = service(&[("a", "paused-a", 60)]).await;

        let listening = service.listening("a").await.unwrap();

        assert!(listening.connected);
        let current = listening.currently_playing.unwrap();
        assert!(!current.is_playing);
        assert_eq!(current.track.name, "paused-a");
    }

    #[tokio::test]
    async fn listening_falls_back_to_history() {
        let service = service(&[("a", "recent-a", 60), ("b", "idle-b", 60)]).await;

        let recent = service.listening("a").await.unwrap();
        assert_eq!(recent.recently_played.unwrap().track.name, "recent-a");

        let idle = service.listening("b").await.unwrap();
        assert!(idle.connected && idle.no_activity);
    }

    #[tokio::test]
    async fn listening_survives_player_errors() {
        let service = service(&[("a", "revoked-a", 60), ("b", "broken-b", 60)]).await;

        let revoked = service.listening("a").await.unwrap();
        assert!(revoked.connected);
        assert!(revoked.currently_playing.is_none());
        assert_eq!(revoked.recently_played.unwrap().track.name, "revoked-a");

        let broken = service.listening("b").await.unwrap();
        assert!(broken.connected && broken.no_activity);
    }

    #[tokio::test]
    async fn unusable_tokens_read_as_disconnected() {
        let service = service(&[("stale", "playing-stale", -5)]).await;

        assert_eq!(service.listening("stale").await.unwrap(), UserListening::default());
        assert_eq!(service.listening("offline").await.unwrap(), UserListening::default());
        assert!(matches!(
            service.now_playing("stale").await,
            Err(AppError::SpotifyNotConnected)
        ));
    }

    #[tokio::test]
    async fn now_playing_when_idle() {
        let service = service(&[("a", "idle-a", 60)]).await;

        let now_playing = service.now_playing("a").await.unwrap();
        assert_eq!(
            serde_json::to_value(&now_playing).unwrap(),
            serde_json::json!({ "isPlaying": false })
        );
    }

    #[test]
    fn disconnected_serializes_minimally() {
        assert_eq!(
            serde_json::to_value(UserListening::default()).unwrap(),
            serde_json::json!({ "connected": false })
        );
    }
}
