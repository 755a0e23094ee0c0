use crate::api;
use crate::config::Config;
use crate::services::{
    AuthService, CatalogImporter, ListeningService, SpotifyApi, TokenManager, VoteLedger,
};
use crate::store::{TrackStore, UserStore, VoteStore};
use crate::week::Clock;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub struct AppState {
    pub db: PgPool,
    pub auth_service: Arc<AuthService>,
    pub clock: Arc<dyn Clock>,
    pub users: Arc<dyn UserStore>,
    pub ledger: Arc<VoteLedger>,
    pub importer: Arc<CatalogImporter>,
    pub token_manager: Arc<TokenManager>,
    pub listening: Arc<ListeningService>,
    pub spotify: Arc<dyn SpotifyApi>,
    pub admin_key: String,
    pub app_url: String,
}

impl AppState {
    /// Wires the services over one store. `db` backs the social routes directly.
    pub fn new<S>(
        db: PgPool,
        config: &Config,
        store: Arc<S>,
        spotify: Arc<dyn SpotifyApi>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        S: TrackStore + VoteStore + UserStore + 'static,
    {
        let tracks: Arc<dyn TrackStore> = store.clone();
        let votes: Arc<dyn VoteStore> = store.clone();
        let users: Arc<dyn UserStore> = store;

        let ledger = Arc::new(VoteLedger::new(
            tracks.clone(),
            votes,
            clock.clone(),
            config.vote_policy,
        ));
        let importer = Arc::new(CatalogImporter::new(tracks, spotify.clone(), clock.clone()));
        let token_manager = Arc::new(TokenManager::new(users.clone(), spotify.clone(), clock.clone()));
        let listening = Arc::new(ListeningService::new(
            users.clone(),
            spotify.clone(),
            token_manager.clone(),
        ));

        Self {
            db,
            auth_service: Arc::new(AuthService::new(config)),
            clock,
            users,
            ledger,
            importer,
            token_manager,
            listening,
            spotify,
            admin_key: config.admin_key.clone(),
            app_url: config.app_url.clone(),
        }
    }
}

pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let api_routes = Router::new()
        .merge(api::track_routes())
        .merge(api::vote_routes())
        .nest("/admin", api::admin_routes())
        .nest("/spotify", api::spotify_routes())
        .merge(api::feed_routes())
        .merge(api::hottake_routes())
        .merge(api::comment_routes())
        .merge(api::user_routes())
        .merge(api::health_routes())
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CompressionLayer::new())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-admin-key"),
        ]);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}
