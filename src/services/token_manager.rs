use crate::error::{AppError, Result};
use crate::services::spotify::SpotifyApi;
use crate::store::UserStore;
use crate::week::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

/// True when a token with this expiry must be refreshed at `now`.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expires_at) => expires_at < now + Duration::minutes(REFRESH_MARGIN_MINUTES),
        None => true,
    }
}

/// Keeps each user's Spotify access token usable.
///
/// There is no lock across the read, refresh and write steps. Two requests for
/// the same user near expiry may both refresh; the last write wins and the
/// stored token is still valid.
pub struct TokenManager {
    users: Arc<dyn UserStore>,
    spotify: Arc<dyn SpotifyApi>,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    pub fn new(users: Arc<dyn UserStore>, spotify: Arc<dyn SpotifyApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            users,
            spotify,
            clock,
        }
    }

    /// Returns `None` when the user has not connected Spotify.
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<Option<String>> {
        let tokens = match self.users.spotify_tokens(user_id).await? {
            Some(tokens) => tokens,
            None => return Ok(None),
        };

        let (access_token, refresh_token) =
            match (tokens.spotify_access_token, tokens.spotify_refresh_token) {
                (Some(access), Some(refresh)) => (access, refresh),
                _ => return Ok(None),
            };

        let now = self.clock.now().with_timezone(&Utc);
        if !needs_refresh(tokens.spotify_expires_at, now) {
            return Ok(Some(access_token));
        }

        tracing::debug!("Refreshing Spotify token for user {}", user_id);

        let grant = self.spotify.refresh_access_token(&refresh_token).await?;
        let expires_at = now + Duration::seconds(grant.expires_in);

        self.users
            .update_access_token(
                user_id,
                &grant.access_token,
                grant.refresh_token.as_deref(),
                expires_at,
            )
            .await?;

        tracing::info!("Refreshed Spotify token for user {}", user_id);
        Ok(Some(grant.access_token))
    }

    /// Completes the OAuth callback by storing a fresh token record.
    pub async fn connect(&self, user_id: &str, code: &str) -> Result<()> {
        let grant = self.spotify.exchange_code(code).await?;
        let refresh_token = grant.refresh_token.ok_or_else(|| {
            AppError::ExternalApi("Spotify did not return a refresh token".to_string())
        })?;
        let expires_at = self.clock.now().with_timezone(&Utc) + Duration::seconds(grant.expires_in);

        self.users
            .save_spotify_tokens(user_id, &grant.access_token, &refresh_token, expires_at)
            .await?;

        tracing::info!("Connected Spotify for user {}", user_id);
        Ok(())
    }

    pub async fn disconnect(&self, user_id: &str) -> Result<()> {
        self.users.clear_spotify_tokens(user_id).await?;
        tracing::info!("Disconnected Spotify for user {}", user_id);
        Ok(())
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
    use chrono::{FixedOffset, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider stub that counts refresh calls and optionally rejects them.
    struct StubProvider {
        refreshes: AtomicUsize,
        reject: bool,
        rotate_refresh_token: bool,
    }

    impl StubProvider {
        fn new(reject: bool, rotate_refresh_token: bool) -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
                reject,
                rotate_refresh_token,
            }
        }
    }

    #[async_trait]
    impl SpotifyApi for StubProvider {
        fn authorize_url(&self, state: &str) -> Result<String> {
            Ok(format!("https://accounts.example/authorize?state={}", state))
        }

        async fn exchange_code(&self, _code: &str) -> Result<TokenGrant> {
            Ok(TokenGrant {
                access_token: "exchanged".to_string(),
                refresh_token: Some("exchanged-refresh".to_string()),
                expires_in: 3600,
            })
        }

        async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(AppError::TokenRefreshFailed("invalid_grant".to_string()));
            }
            Ok(TokenGrant {
                access_token: "refreshed".to_string(),
                refresh_token: self.rotate_refresh_token.then(|| "rotated".to_string()),
                expires_in: 3600,
            })
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

        async fn currently_playing(&self, _token: &str) -> Result<Option<CurrentlyPlaying>> {
            unimplemented!()
        }

        async fn recently_played(&self, _token: &str) -> Result<Option<RecentlyPlayed>> {
            unimplemented!()
        }
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 5, 12, 0, 0)
            .unwrap()
    }

    async fn setup(
        expires_in_minutes: Option<i64>,
        provider: StubProvider,
    ) -> (Arc<MemoryStore>, Arc<StubProvider>, TokenManager) {
        let store = Arc::new(MemoryStore::new());
        store.ensure_user(&NewUser::new("u1", "Ikka")).await.unwrap();
        store
            .set_spotify_tokens(
                "u1",
                SpotifyTokens {
                    spotify_access_token: Some("stored".to_string()),
                    spotify_refresh_token: Some("stored-refresh".to_string()),
                    spotify_expires_at: expires_in_minutes
                        .map(|m| now().with_timezone(&Utc) + Duration::minutes(m)),
                },
            )
            .await;

        let provider = Arc::new(provider);
        let manager = TokenManager::new(store.clone(), provider.clone(), Arc::new(FixedClock(now())));
        (store, provider, manager)
    }

    #[test]
    fn refresh_window_is_five_minutes() {
        let now = Utc::now();
        assert!(needs_refresh(None, now));
        assert!(needs_refresh(Some(now - Duration::seconds(1)), now));
        assert!(needs_refresh(Some(now + Duration::minutes(4)), now));
        assert!(!needs_refresh(Some(now + Duration::minutes(6)), now));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_unchanged() {
        let (_, provider, manager) = setup(Some(30), StubProvider::new(false, false)).await;

        let token = manager.get_valid_access_token("u1").await.unwrap();

        assert_eq!(token.as_deref(), Some("stored"));
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_near_expiry_is_refreshed_and_persisted() {
        let (store, provider, manager) = setup(Some(3), StubProvider::new(false, false)).await;

        let token = manager.get_valid_access_token("u1").await.unwrap();

        assert_eq!(token.as_deref(), Some("refreshed"));
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);

        let stored = store.spotify_tokens("u1").await.unwrap().unwrap();
        assert_eq!(stored.spotify_access_token.as_deref(), Some("refreshed"));
        assert_eq!(stored.spotify_refresh_token.as_deref(), Some("stored-refresh"));
        assert_eq!(
            stored.spotify_expires_at,
            Some(now().with_timezone(&Utc) + Duration::seconds(3600))
        );
    }

    #[tokio::test]
    async fn expired_token_adopts_rotated_refresh_token() {
        let (store, _, manager) = setup(Some(-10), StubProvider::new(false, true)).await;

        manager.get_valid_access_token("u1").await.unwrap();

        let stored = store.spotify_tokens("u1").await.unwrap().unwrap();
        assert_eq!(stored.spotify_refresh_token.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn missing_expiry_forces_refresh() {
        let (_, provider, manager) = setup(None, StubProvider::new(false, false)).await;

        manager.get_valid_access_token("u1").await.unwrap();
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stored_tokens() {
        let (store, _, manager) = setup(Some(1), StubProvider::new(true, false)).await;

        let err = manager.get_valid_access_token("u1").await.unwrap_err();
        assert!(matches!(err, AppError::TokenRefreshFailed(_)));

        let stored = store.spotify_tokens("u1").await.unwrap().unwrap();
        assert_eq!(stored.spotify_access_token.as_deref(), Some("stored"));
        assert_eq!(stored.spotify_refresh_token.as_deref(), Some("stored-refresh"));
    }

    #[tokio::test]
    async fn unconnected_user_has_no_token() {
        let (store, provider, manager) = setup(Some(30), StubProvider::new(false, false)).await;
        store.ensure_user(&NewUser::new("u2", "Karma")).await.unwrap();

        assert_eq!(manager.get_valid_access_token("u2").await.unwrap(), None);
        assert_eq!(manager.get_valid_access_token("ghost").await.unwrap(), None);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_then_disconnect() {
        let (store, _, manager) = setup(None, StubProvider::new(false, false)).await;
        store.ensure_user(&NewUser::new("u3", "Naezy")).await.unwrap();

        manager.connect("u3", "code").await.unwrap();
        let stored = store.spotify_tokens("u3").await.unwrap().unwrap();
        assert!(stored.is_connected());
        assert_eq!(stored.spotify_access_token.as_deref(), Some("exchanged"));

        manager.disconnect("u3").await.unwrap();
        assert_eq!(manager.get_valid_access_token("u3").await.unwrap(), None);
    }
}
