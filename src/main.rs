use estier::app::{build_router, AppState};
use estier::config::Config;
use estier::services::SpotifyClient;
use estier::store::PgStore;
use estier::week::SystemClock;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,estier=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        "Configuration loaded (vote policy: {}, voting offset: {})",
        config.vote_policy,
        config.voting_offset
    );

    if config.spotify_app.is_none() {
        tracing::warn!("SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET not set, Spotify imports will fail");
    }

    // Connect to database
    let db = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations completed");

    let store = Arc::new(PgStore::new(db.clone()));
    let spotify = Arc::new(SpotifyClient::new(&config));
    let clock = Arc::new(SystemClock::new(config.voting_offset));

    let app_state = Arc::new(AppState::new(db, &config, store, spotify, clock));
    let app = build_router(app_state, &config.cors_origins);

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
