use crate::config::{Config, SpotifyCredentials};
use crate::error::{AppError, Result};
use crate::models::NewTrack;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const ACCOUNTS_URL: &str = "https://accounts.spotify.com";
const API_URL: &str = "https://api.spotify.com/v1";
const SCOPES: &str = "user-read-currently-playing user-read-recently-played user-top-read";

/// Token endpoint response for every grant type.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent on most refresh responses
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayingTrack {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub image_url: Option<String>,
    pub spotify_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentlyPlaying {
    pub is_playing: bool,
    pub track: Option<PlayingTrack>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentlyPlayed {
    pub track: PlayingTrack,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Track,
    Album,
    Playlist,
}

impl SourceKind {
    fn segment(self) -> &'static str {
        match self {
            SourceKind::Track => "track",
            SourceKind::Album => "album",
            SourceKind::Playlist => "playlist",
        }
    }
}

/// Classifies an import source. Anything not recognisably an album or playlist is a track.
pub fn parse_source(input: &str) -> (SourceKind, String) {
    for kind in [SourceKind::Playlist, SourceKind::Album] {
        if let Some(id) = find_id(input, kind.segment()) {
            return (kind, id);
        }
    }
    (SourceKind::Track, extract_spotify_id(input, "track"))
}

/// Pulls the id out of an `open.spotify.com/{kind}/{id}` URL or `spotify:{kind}:{id}` URI.
/// Input that matches neither is returned unchanged.
pub fn extract_spotify_id(input: &str, kind: &str) -> String {
    find_id(input, kind).unwrap_or_else(|| input.trim().to_string())
}

fn find_id(input: &str, kind: &str) -> Option<String> {
    [format!("{}/", kind), format!("spotify:{}:", kind)]
        .iter()
        .find_map(|marker| {
            let start = input.find(marker.as_str())? + marker.len();
            let id: String = input[start..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            (!id.is_empty()).then_some(id)
        })
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    name: String,
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    album: Option<ApiAlbum>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

impl ApiTrack {
    fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn cover_url(&self) -> Option<String> {
        self.album
            .as_ref()
            .and_then(|album| album.images.first())
            .map(|image| image.url.clone())
    }

    fn into_new_track(self) -> NewTrack {
        NewTrack {
            artist: self.artist_names(),
            image_url: self.cover_url(),
            title: self.name,
            spotify_url: self.external_urls.spotify,
            youtube_url: None,
        }
    }

    fn into_playing(self) -> PlayingTrack {
        PlayingTrack {
            artist: self.artist_names(),
            image_url: self.cover_url(),
            album: self.album.map(|a| a.name).unwrap_or_default(),
            name: self.name,
            spotify_url: self.external_urls.spotify,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlayingResponse {
    #[serde(default)]
    is_playing: bool,
    item: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct PlayHistory {
    track: ApiTrack,
    played_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Paging<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TrackRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<TrackRef>,
}

/// Operations the service needs from the Spotify Web API.
#[async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Authorization page URL for the per-user OAuth flow.
    fn authorize_url(&self, state: &str) -> Result<String>;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    /// Fails with `TokenRefreshFailed` when the provider rejects the refresh or is unreachable.
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant>;

    async fn track(&self, id: &str) -> Result<NewTrack>;

    async fn album_track_ids(&self, id: &str) -> Result<Vec<String>>;

    async fn playlist_track_ids(&self, id: &str) -> Result<Vec<String>>;

    /// `None` when no device is active.
    async fn currently_playing(&self, access_token: &str) -> Result<Option<CurrentlyPlaying>>;

    async fn recently_played(&self, access_token: &str) -> Result<Option<RecentlyPlayed>>;
}

#[derive(Debug, Clone)]
struct AppToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct SpotifyClient {
    app: Option<SpotifyCredentials>,
    oauth: Option<SpotifyCredentials>,
    redirect_uri: String,
    app_token: RwLock<Option<AppToken>>,
    client: Client,
}

impl SpotifyClient {
    pub fn new(config: &Config) -> Self {
        Self {
            app: config.spotify_app.clone(),
            oauth: config.spotify_oauth.clone(),
            redirect_uri: config.spotify_redirect_uri.clone(),
            app_token: RwLock::new(None),
            client: Client::new(),
        }
    }

    fn oauth_credentials(&self) -> Result<&SpotifyCredentials> {
        self.oauth
            .as_ref()
            .ok_or_else(|| AppError::ExternalApi("Spotify not configured".to_string()))
    }

    async fn request_token(
        &self,
        credentials: &SpotifyCredentials,
        form: &[(&str, &str)],
    ) -> std::result::Result<TokenGrant, String> {
        let response = self
            .client
            .post(format!("{}/api/token", ACCOUNTS_URL))
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Token endpoint returned {} - {}", status, body));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| format!("Failed to parse token response: {}", e))
    }

    /// Client-credentials token for catalog lookups, cached until shortly before expiry.
    async fn app_access_token(&self) -> Result<String> {
        if let Some(token) = self.app_token.read().await.as_ref() {
            if token.expires_at > Utc::now() + Duration::minutes(1) {
                return Ok(token.access_token.clone());
            }
        }

        let credentials = self
            .app
            .as_ref()
            .ok_or_else(|| AppError::ExternalApi("Spotify credentials not configured".to_string()))?;

        let grant = self
            .request_token(credentials, &[("grant_type", "client_credentials")])
            .await
            .map_err(AppError::ExternalApi)?;

        let token = AppToken {
            access_token: grant.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
        };
        *self.app_token.write().await = Some(token);

        tracing::debug!("Obtained Spotify app token");
        Ok(grant.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        tracing::debug!("Spotify request: {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Spotify request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Spotify API error: {} - {}", status, body);
            return Err(AppError::ExternalApi(format!(
                "Spotify returned status: {}",
                status
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Failed to parse Spotify response: {}", e)))
    }
}

#[async_trait]
impl SpotifyApi for SpotifyClient {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let credentials = self.oauth_credentials()?;

        let url = reqwest::Url::parse_with_params(
            &format!("{}/authorize", ACCOUNTS_URL),
            &[
                ("client_id", credentials.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", SCOPES),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid authorize URL: {}", e)))?;

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let credentials = self.oauth_credentials()?;

        self.request_token(
            credentials,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .await
        .map_err(|e| {
            tracing::error!("Spotify token exchange failed: {}", e);
            AppError::ExternalApi(e)
        })
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let credentials = self
            .oauth
            .as_ref()
            .ok_or_else(|| AppError::TokenRefreshFailed("Spotify not configured".to_string()))?;

        self.request_token(
            credentials,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
        .map_err(AppError::TokenRefreshFailed)
    }

    async fn track(&self, id: &str) -> Result<NewTrack> {
        let token = self.app_access_token().await?;
        let track: ApiTrack = self
            .get_json(&format!("{}/tracks/{}", API_URL, id), &token)
            .await?;

        Ok(track.into_new_track())
    }

    async fn album_track_ids(&self, id: &str) -> Result<Vec<String>> {
        let token = self.app_access_token().await?;
        let page: Paging<TrackRef> = self
            .get_json(&format!("{}/albums/{}/tracks?limit=50", API_URL, id), &token)
            .await?;

        Ok(page.items.into_iter().filter_map(|t| t.id).collect())
    }

    async fn playlist_track_ids(&self, id: &str) -> Result<Vec<String>> {
        let token = self.app_access_token().await?;
        let page: Paging<PlaylistItem> = self
            .get_json(
                &format!("{}/playlists/{}/tracks?limit=100&fields=items(track(id))", API_URL, id),
                &token,
            )
            .await?;

        // Local files and removed tracks come back without an id
        Ok(page
            .items
            .into_iter()
            .filter_map(|item| item.track.and_then(|t| t.id))
            .collect())
    }

    async fn currently_playing(&self, access_token: &str) -> Result<Option<CurrentlyPlaying>> {
        let response = self
            .client
            .get(format!("{}/me/player/currently-playing", API_URL))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Spotify request failed: {}", e)))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(AppError::ExternalApi(format!(
                    "Failed to fetch currently playing track: {}",
                    status
                )));
            }
            _ => {}
        }

        let data: CurrentlyPlayingResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Failed to parse Spotify response: {}", e)))?;

        Ok(Some(CurrentlyPlaying {
            is_playing: data.is_playing,
            track: data.item.map(ApiTrack::into_playing),
        }))
    }

    async fn recently_played(&self, access_token: &str) -> Result<Option<RecentlyPlayed>> {
        let page: Paging<PlayHistory> = self
            .get_json(
                &format!("{}/me/player/recently-played?limit=1", API_URL),
                access_token,
            )
            .await?;

        Ok(page.items.into_iter().next().map(|item| RecentlyPlayed {
            track: item.track.into_playing(),
            played_at: item.played_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_track_id_from_url() {
        assert_eq!(
            extract_spotify_id(
                "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc",
                "track"
            ),
            "4uLU6hMCjMI75M1A2tKUQC"
        );
        assert_eq!(
            extract_spotify_id("spotify:track:4uLU6hMCjMI75M1A2tKUQC", "track"),
            "4uLU6hMCjMI75M1A2tKUQC"
        );
        assert_eq!(extract_spotify_id(" 4uLU6hMC ", "track"), "4uLU6hMC");
    }

    #[test]
    fn classifies_sources() {
        assert_eq!(
            parse_source("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3"),
            (SourceKind::Album, "1DFixLWuPkv3KT3TnV35m3".to_string())
        );
        assert_eq!(
            parse_source("https://open.spotify.com/playlist/37i9dQZF1DX0XUsuxWHRQd?si=x"),
            (SourceKind::Playlist, "37i9dQZF1DX0XUsuxWHRQd".to_string())
        );
        assert_eq!(
            parse_source("https://open.spotify.com/intl-de/track/abc123"),
            (SourceKind::Track, "abc123".to_string())
        );
    }

    #[test]
    fn track_payload_maps_to_new_track() {
        let payload = serde_json::json!({
            "id": "abc",
            "name": "Nanchaku",
            "artists": [{ "name": "Seedhe Maut" }, { "name": "MC STAN" }],
            "album": { "name": "n", "images": [{ "url": "https://i.scdn.co/image/big" }, { "url": "https://i.scdn.co/image/small" }] },
            "external_urls": { "spotify": "https://open.spotify.com/track/abc" }
        });

        let track: ApiTrack = serde_json::from_value(payload).unwrap();
        let new_track = track.into_new_track();

        assert_eq!(new_track.title, "Nanchaku");
        assert_eq!(new_track.artist, "Seedhe Maut, MC STAN");
        assert_eq!(new_track.image_url.as_deref(), Some("https://i.scdn.co/image/big"));
        assert_eq!(
            new_track.spotify_url.as_deref(),
            Some("https://open.spotify.com/track/abc")
        );
    }

    #[test]
    fn refresh_response_may_omit_refresh_token() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token":"new","token_type":"Bearer","expires_in":3600}"#)
                .unwrap();
        assert_eq!(grant.access_token, "new");
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn currently_playing_without_album_images() {
        let data: CurrentlyPlayingResponse = serde_json::from_value(serde_json::json!({
            "is_playing": true,
            "item": {
                "name": "Wahid",
                "artists": [{ "name": "Talha Anjum" }],
                "album": { "name": "Open Letter", "images": [] },
                "external_urls": {}
            }
        }))
        .unwrap();

        let playing = data.item.map(ApiTrack::into_playing).unwrap();
        assert_eq!(playing.album, "Open Letter");
        assert!(playing.image_url.is_none());
        assert!(playing.spotify_url.is_none());
    }
}
