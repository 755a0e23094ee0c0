use crate::error::{AppError, Result};
use crate::models::NewTrack;
use crate::services::spotify::{parse_source, SourceKind, SpotifyApi};
use crate::store::TrackStore;
use crate::week::{self, Clock};
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub count: u64,
    pub week_start: NaiveDate,
}

/// Loads the weekly track list. Imports are all-or-nothing.
pub struct CatalogImporter {
    tracks: Arc<dyn TrackStore>,
    spotify: Arc<dyn SpotifyApi>,
    clock: Arc<dyn Clock>,
}

impl CatalogImporter {
    pub fn new(tracks: Arc<dyn TrackStore>, spotify: Arc<dyn SpotifyApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracks,
            spotify,
            clock,
        }
    }

    /// Resolves track, album and playlist links and stores every track in the current week.
    pub async fn import_sources(&self, sources: &[String]) -> Result<ImportSummary> {
        if sources.is_empty() {
            return Err(AppError::InvalidInput("No Spotify URLs provided".to_string()));
        }

        let resolved = try_join_all(sources.iter().map(|source| self.resolve(source))).await?;
        let tracks: Vec<NewTrack> = resolved.into_iter().flatten().collect();

        tracing::info!(
            "Resolved {} Spotify sources into {} tracks",
            sources.len(),
            tracks.len()
        );

        self.import_tracks(tracks).await
    }

    /// Stores already-described tracks in the current week.
    pub async fn import_tracks(&self, tracks: Vec<NewTrack>) -> Result<ImportSummary> {
        if tracks.is_empty() {
            return Err(AppError::InvalidInput("No tracks provided".to_string()));
        }

        for track in &tracks {
            track
                .validate()
                .map_err(|e| AppError::Validation(e.to_string()))?;
        }

        let week_start = week::week_start_date(&self.clock.now());
        let count = self.tracks.insert_tracks(week_start, &tracks).await?;

        tracing::info!("Imported {} tracks for week of {}", count, week_start);
        Ok(ImportSummary { count, week_start })
    }

    pub async fn delete_current_week(&self) -> Result<u64> {
        let week_start = week::week_start_date(&self.clock.now());
        let deleted = self.tracks.delete_week(week_start).await?;

        tracing::info!("Deleted {} tracks for week of {}", deleted, week_start);
        Ok(deleted)
    }

    async fn resolve(&self, source: &str) -> Result<Vec<NewTrack>> {
        let (kind, id) = parse_source(source);

        let ids = match kind {
            SourceKind::Track => return Ok(vec![self.spotify.track(&id).await?]),
            SourceKind::Album => self.spotify.album_track_ids(&id).await?,
            SourceKind::Playlist => self.spotify.playlist_track_ids(&id).await?,
        };

        tracing::debug!("Expanding {:?} {} into {} tracks", kind, id, ids.len());

        try_join_all(ids.iter().map(|track_id| self.spotify.track(track_id))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::spotify::{CurrentlyPlaying, RecentlyPlayed, TokenGrant};
    use crate::store::MemoryStore;
    use crate::week::FixedClock;
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone};

    /// Catalog with one album (`al1` = t1, t2) and one playlist (`pl1` = t3).
    /// Track ids starting with `bad` fail.
    struct StubCatalog;

    #[async_trait]
    impl SpotifyApi for StubCatalog {
        fn authorize_url(&self, _state: &str) -> Result<String> {
            unimplemented!()
        }

        async fn exchange_code(&self, _code: &str) -> Result<TokenGrant> {
            unimplemented!()
        }

        async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant> {
            unimplemented!()
        }

        async fn track(&self, id: &str) -> Result<NewTrack> {
            if id.starts_with("bad") {
                return Err(AppError::ExternalApi("Spotify returned status: 404".to_string()));
            }
            Ok(NewTrack {
                title: format!("Song {}", id),
                artist: "Prabh Deep".to_string(),
                spotify_url: Some(format!("https://open.spotify.com/track/{}", id)),
                youtube_url: None,
                image_url: None,
            })
        }

        async fn album_track_ids(&self, _id: &str) -> Result<Vec<String>> {
            Ok(vec!["t1".to_string(), "t2".to_string()])
        }

        async fn playlist_track_ids(&self, _id: &str) -> Result<Vec<String>> {
            Ok(vec!["t3".to_string()])
        }

        async fn currently_playing(&self, _token: &str) -> Result<Option<CurrentlyPlaying>> {
            unimplemented!()
        }

        async fn recently_played(&self, _token: &str) -> Result<Option<RecentlyPlayed>> {
            unimplemented!()
        }
    }

    fn importer(store: &Arc<MemoryStore>) -> CatalogImporter {
        let wednesday = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 5, 10, 0, 0)
            .unwrap();
        CatalogImporter::new(store.clone(), Arc::new(StubCatalog), Arc::new(FixedClock(wednesday)))
    }

    #[tokio::test]
    async fn expands_albums_and_playlists() {
        let store = Arc::new(MemoryStore::new());
        let sources = vec![
            "https://open.spotify.com/track/t0".to_string(),
            "https://open.spotify.com/album/al1".to_string(),
            "spotify:playlist:pl1".to_string(),
        ];

        let summary = importer(&store).import_sources(&sources).await.unwrap();

        assert_eq!(summary.count, 4);
        assert_eq!(summary.week_start, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());

        let titles: Vec<String> = store.tracks().await.into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["Song t0", "Song t1", "Song t2", "Song t3"]);
    }

    #[tokio::test]
    async fn one_failing_source_imports_nothing() {
        let store = Arc::new(MemoryStore::new());
        let sources = vec![
            "https://open.spotify.com/track/t0".to_string(),
            "https://open.spotify.com/track/bad1".to_string(),
        ];

        let err = importer(&store).import_sources(&sources).await.unwrap_err();

        assert!(matches!(err, AppError::ExternalApi(_)));
        assert!(store.tracks().await.is_empty());
    }

    #[tokio::test]
    async fn manual_tracks_are_validated() {
        let store = Arc::new(MemoryStore::new());
        let blank = NewTrack {
            title: String::new(),
            artist: "Nobody".to_string(),
            spotify_url: None,
            youtube_url: None,
            image_url: None,
        };

        let err = importer(&store).import_tracks(vec![blank]).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = importer(&store).import_sources(&[]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_only_touches_current_week() {
        let store = Arc::new(MemoryStore::new());
        let old_week = NaiveDate::from_ymd_opt(2024, 5, 27).unwrap();
        store
            .insert_track_at(
                old_week,
                StubCatalog.track("old").await.unwrap(),
                chrono::Utc::now(),
            )
            .await;

        let importer = importer(&store);
        importer
            .import_sources(&["https://open.spotify.com/track/t9".to_string()])
            .await
            .unwrap();

        assert_eq!(importer.delete_current_week().await.unwrap(), 1);
        let remaining = store.tracks().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].week_start, old_week);
    }
}
