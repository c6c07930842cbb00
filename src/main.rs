mod config;
mod models;
mod routes;
mod services;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::models::SourceConfig;
use crate::services::{
    channel_cache::{ChannelCache, EVICTION_INTERVAL},
    config_codec::ConfigCodec,
    fetcher::HttpFetcher,
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub codec: ConfigCodec,
    pub cache: ChannelCache,
    pub start_time: Instant,
}

impl AppState {
    /// Configuration used when the request carries no token
    pub fn default_config(&self) -> SourceConfig {
        SourceConfig::new(
            self.config.default_m3u_url.clone(),
            self.config.default_target_ip.clone(),
        )
    }
}

/// Build the HTTP router. Everything that is not a service endpoint belongs
/// to the addon path space and goes through the fallback.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/live", get(routes::health::live))
        // Addon: manifest, catalog, meta, stream (optionally token-prefixed)
        .fallback(routes::addon::dispatch)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playlist_addon=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting Playlist Addon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        default_source = %config.default_m3u_url,
        default_target = config.default_target_ip.as_deref().unwrap_or("original"),
        "Playlist defaults"
    );

    // Initialize services
    let fetcher = HttpFetcher::new(
        &config.user_agent,
        config.fetch_timeout_ms,
        config.max_retries,
        config.max_m3u_size_mb,
    )?;
    let cache = ChannelCache::new(Arc::new(fetcher));
    let codec = ConfigCodec::new(config.default_m3u_url.clone());
    tracing::info!("Channel cache initialized");

    // Build application state
    let state = Arc::new(AppState {
        config,
        codec,
        cache,
        start_time: Instant::now(),
    });

    // Sweep expired playlists (runs in background)
    let sweeper = Arc::clone(&state);
    tokio::spawn(async move { sweeper.cache.run_eviction(EVICTION_INTERVAL).await });

    let app = build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
